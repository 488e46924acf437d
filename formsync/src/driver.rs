//! Reconciliation driver.
//!
//! [`ResourceForm`] owns one resource's [`FormState`] and sequences every
//! operation on it:
//!
//! ```text
//! Idle ──load──▶ Loading ──ok──▶ Ready ──save──▶ Saving ──ok──▶ Loading ──▶ Ready
//!                   │                               │
//!                   └──err──▶ Error ──retry──▶ Loading   └──err──▶ Ready (form untouched)
//! ```
//!
//! At most one fetch or save is in flight per resource; a second caller gets
//! [`Error::Busy`] without touching the network. Every operation is tied to a
//! cancellation token, and results arriving after [`ResourceForm::close`] are
//! dropped instead of committed.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{Ack, Adapter};
use crate::errors::{Error, Result};
use crate::form::{FormState, NormalizedForm};
use crate::notifications::Notifier;
use crate::session::Session;
use crate::upload::FileUpload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Saving,
    /// Fetch failed; holds the message shown in the error panel
    Error(String),
}

/// Everything a form shares with its siblings: session, toasts, and the
/// parent lifetime its own cancellation token hangs off.
#[derive(Clone)]
pub struct FormContext {
    pub session: Arc<dyn Session>,
    pub notifier: Notifier,
    pub lifetime: CancellationToken,
}

impl FormContext {
    pub fn new(session: Arc<dyn Session>, notifier: Notifier) -> Self {
        Self {
            session,
            notifier,
            lifetime: CancellationToken::new(),
        }
    }

    /// Same session and notifier, lifetime nested under this one.
    pub fn child(&self) -> Self {
        Self {
            session: self.session.clone(),
            notifier: self.notifier.clone(),
            lifetime: self.lifetime.child_token(),
        }
    }
}

/// Run `fut` unless `lifetime` is cancelled first; a result that lands after
/// cancellation is discarded.
pub(crate) async fn guarded<T>(
    lifetime: &CancellationToken,
    resource: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let result = tokio::select! {
        biased;
        _ = lifetime.cancelled() => return Err(Error::Cancelled),
        result = fut => result,
    };
    if lifetime.is_cancelled() {
        debug!(resource, "Discarding result of cancelled operation");
        return Err(Error::Cancelled);
    }
    result
}

struct Slot {
    phase: Phase,
    form: FormState,
    baseline: Option<NormalizedForm>,
}

pub struct ResourceForm<A: Adapter> {
    adapter: A,
    session: Arc<dyn Session>,
    notifier: Notifier,
    lifetime: CancellationToken,
    in_flight: Semaphore,
    slot: Mutex<Slot>,
}

impl<A: Adapter> ResourceForm<A> {
    pub fn new(adapter: A, ctx: &FormContext) -> Self {
        let form = FormState::new(adapter.fields());
        Self {
            adapter,
            session: ctx.session.clone(),
            notifier: ctx.notifier.clone(),
            lifetime: ctx.lifetime.child_token(),
            in_flight: Semaphore::new(1),
            slot: Mutex::new(Slot {
                phase: Phase::Idle,
                form,
                baseline: None,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        self.slot().phase = phase;
    }

    fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.in_flight.try_acquire().map_err(|_| Error::Busy {
            resource: self.adapter.name().to_string(),
        })
    }

    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        guarded(&self.lifetime, self.adapter.name(), fut).await
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn phase(&self) -> Phase {
        self.slot().phase.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.available_permits() == 0
    }

    /// Copy of the current form state
    pub fn form(&self) -> FormState {
        self.slot().form.clone()
    }

    /// Last form fetched from the server
    pub fn baseline(&self) -> Option<NormalizedForm> {
        self.slot().baseline.clone()
    }

    /// Fields edited since the last fetch
    pub fn changes(&self) -> std::collections::BTreeMap<String, Value> {
        let slot = self.slot();
        match &slot.baseline {
            Some(baseline) => slot.form.diff(baseline),
            None => Default::default(),
        }
    }

    /// Fetch and seed. Also the manual retry after an error.
    #[instrument(skip(self), fields(resource = self.adapter.name()))]
    pub async fn load(&self) -> Result<()> {
        let _permit = self.acquire()?;
        self.reload().await
    }

    pub async fn retry(&self) -> Result<()> {
        self.load().await
    }

    /// Fetch with the permit already held.
    async fn reload(&self) -> Result<()> {
        self.set_phase(Phase::Loading);
        let token = self.session.access_token();

        match self.guarded(self.adapter.fetch(token.as_deref())).await {
            Ok(normalized) => {
                let mut slot = self.slot();
                slot.form.seed(normalized.clone());
                slot.baseline = Some(normalized);
                slot.phase = Phase::Ready;
                debug!("Form seeded");
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) if e.is_not_found() && self.adapter.optional() => {
                info!(resource = self.adapter.name(), "Resource not created yet, keeping empty form");
                let mut slot = self.slot();
                if slot.baseline.is_none() {
                    let defaults = NormalizedForm::defaults(self.adapter.fields());
                    slot.form.seed(defaults.clone());
                    slot.baseline = Some(defaults);
                }
                slot.phase = Phase::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(resource = self.adapter.name(), error = %e, "Failed to load");
                self.set_phase(Phase::Error(e.user_message()));
                Err(e)
            }
        }
    }

    /// Save the current form, then re-fetch so the form reflects server
    /// truth. On failure the form is left exactly as it was.
    #[instrument(skip(self), fields(resource = self.adapter.name()))]
    pub async fn save(&self) -> Result<Ack> {
        let _permit = self.acquire()?;

        let snapshot = {
            let mut slot = self.slot();
            if slot.baseline.is_none() {
                return Err(Error::NoBaseline {
                    resource: self.adapter.name().to_string(),
                });
            }
            slot.phase = Phase::Saving;
            slot.form.clone()
        };

        let token = self.session.access_token();
        match self.guarded(self.adapter.save(token.as_deref(), &snapshot)).await {
            Ok(ack) => {
                self.notifier
                    .success(self.adapter.name(), format!("{} saved successfully", self.adapter.name()));
                // A failed re-fetch lands in the error phase; the write itself succeeded.
                if let Err(e) = self.reload().await {
                    debug!(error = %e, "Re-fetch after save failed");
                }
                Ok(ack)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                self.set_phase(Phase::Ready);
                self.notifier.error(self.adapter.name(), e.user_message());
                Err(e)
            }
        }
    }

    /// Run a one-off sub-action (password change and the like) under the same
    /// single-flight and cancellation rules as a save, with toast feedback.
    /// Does not re-fetch.
    pub async fn perform<T, F, Fut>(&self, success_message: &str, op: F) -> Result<T>
    where
        F: FnOnce(Option<String>, FormState) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let _permit = self.acquire()?;
        let token = self.session.access_token();
        let snapshot = self.form();

        match self.guarded(op(token, snapshot)).await {
            Ok(value) => {
                self.notifier.success(self.adapter.name(), success_message);
                Ok(value)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                self.notifier.error(self.adapter.name(), e.user_message());
                Err(e)
            }
        }
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<()> {
        self.slot().form.set_field(name, value)
    }

    pub fn toggle_field(&self, name: &str) -> Result<bool> {
        self.slot().form.toggle_field(name)
    }

    pub fn set_array_membership(&self, name: &str, item: &str, included: bool) -> Result<()> {
        self.slot().form.set_array_membership(name, item, included)
    }

    pub fn set_transient(&self, name: &str, value: impl Into<String>) {
        self.slot().form.set_transient(name, value);
    }

    pub fn clear_transient(&self) {
        self.slot().form.clear_transient();
    }

    pub fn attach_file(&self, name: &str, file: FileUpload) {
        self.slot().form.attach_file(name, file);
    }

    /// Tear down: anything still in flight is discarded when it lands.
    pub fn close(&self) {
        self.lifetime.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }
}

impl<A: Adapter> Drop for ResourceForm<A> {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// Object-safe view of a [`ResourceForm`], used where forms of different
/// resources sit side by side (tabs, the CLI).
#[async_trait]
pub trait SyncedForm: Send + Sync {
    fn name(&self) -> &str;
    fn phase(&self) -> Phase;
    fn form(&self) -> FormState;
    async fn load(&self) -> Result<()>;
    async fn retry(&self) -> Result<()>;
    async fn save(&self) -> Result<Ack>;
    fn set_field(&self, name: &str, value: Value) -> Result<()>;
    fn toggle_field(&self, name: &str) -> Result<bool>;
    fn set_array_membership(&self, name: &str, item: &str, included: bool) -> Result<()>;
    fn attach_file(&self, name: &str, file: FileUpload);
    fn close(&self);
}

#[async_trait]
impl<A: Adapter> SyncedForm for ResourceForm<A> {
    fn name(&self) -> &str {
        ResourceForm::name(self)
    }

    fn phase(&self) -> Phase {
        ResourceForm::phase(self)
    }

    fn form(&self) -> FormState {
        ResourceForm::form(self)
    }

    async fn load(&self) -> Result<()> {
        ResourceForm::load(self).await
    }

    async fn retry(&self) -> Result<()> {
        ResourceForm::retry(self).await
    }

    async fn save(&self) -> Result<Ack> {
        ResourceForm::save(self).await
    }

    fn set_field(&self, name: &str, value: Value) -> Result<()> {
        ResourceForm::set_field(self, name, value)
    }

    fn toggle_field(&self, name: &str) -> Result<bool> {
        ResourceForm::toggle_field(self, name)
    }

    fn set_array_membership(&self, name: &str, item: &str, included: bool) -> Result<()> {
        ResourceForm::set_array_membership(self, name, item, included)
    }

    fn attach_file(&self, name: &str, file: FileUpload) {
        ResourceForm::attach_file(self, name, file)
    }

    fn close(&self) {
        ResourceForm::close(self)
    }
}
