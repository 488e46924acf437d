//! # formsync: form synchronization for the syndicate settings panels
//!
//! Every settings panel of the platform (investor settings, manager settings,
//! team management, document generation) follows the same loop against the
//! REST backend:
//!
//! ```text
//! fetch → normalize → edit → save → re-fetch → reconcile
//! ```
//!
//! `formsync` implements that loop once.
//!
//! - A [`Resource`](adapter::Resource) describes one backend record: its
//!   endpoint, response envelope, field schema and write method.
//!   [`ResourceAdapter`](adapter::ResourceAdapter) turns it into `fetch` and
//!   `save` calls, normalizing the wire shape on the way in and coercing edits
//!   on the way out.
//! - A [`FormState`](form::FormState) is the editable mirror of one record,
//!   seeded wholesale on every fetch.
//! - A [`ResourceForm`](driver::ResourceForm) drives the loop: loading, error
//!   and saving phases, toasts, a single in-flight operation per resource, and
//!   cancellation so results landing after a form is closed are discarded.
//!
//! Team management batches edits to many members into a change set
//! ([`resources::team`]); document generation keeps a session hint of freshly
//! generated documents next to the authoritative server list
//! ([`resources::documents`]).
//!
//! ## Usage
//!
//! ```no_run
//! use formsync::{Config, Panels, Tab};
//! use serde_json::json;
//!
//! # async fn run(config: Config) -> formsync::Result<()> {
//! let panels = Panels::from_config(&config)?;
//!
//! let tabs = panels.investor_settings();
//! if let Some(load) = tabs.activate(Tab::SecurityPrivacy) {
//!     load.await.map_err(anyhow::Error::from)??;
//! }
//!
//! let security = tabs.form(Tab::SecurityPrivacy).expect("tab exists");
//! security.set_field("session_timeout_minutes", json!(120))?;
//! security.save().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Sessions are injected: components never read credentials from ambient
//! state, they receive an `Arc<dyn Session>` ([`session::MemorySession`] in
//! tests, [`session::FileSession`] in the CLI).

use std::sync::Arc;

use bon::Builder;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub mod adapter;
pub mod client;
pub mod collection;
pub mod config;
pub mod driver;
pub mod errors;
pub mod form;
pub mod notifications;
pub mod resources;
pub mod schema;
pub mod session;
pub mod tabs;
pub mod telemetry;
pub mod upload;

pub use client::ApiClient;
pub use config::Config;
pub use driver::{FormContext, Phase, ResourceForm, SyncedForm};
pub use errors::{Error, Result};
pub use notifications::{Notifier, Toast, ToastKind};
pub use session::{FileSession, MemorySession, Session};
pub use tabs::{Tab, TabSet};

use adapter::ResourceAdapter;
use resources::documents::{DocumentLibrary, DocumentsUpdated, document_events};
use resources::investor::SecurityPrivacy;
use resources::team::TeamRoster;

/// Entry point handing out every panel, all sharing one HTTP client, session
/// and notifier.
///
/// ```ignore
/// let panels = Panels::builder()
///     .client(ApiClient::new(base_url, None)?)
///     .session(Arc::new(MemorySession::with_token(token)))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct Panels {
    pub client: ApiClient,
    pub session: Arc<dyn Session>,
    #[builder(default)]
    pub notifier: Notifier,
    #[builder(skip = document_events())]
    documents_updated: broadcast::Sender<DocumentsUpdated>,
    #[builder(skip)]
    lifetime: CancellationToken,
}

impl Panels {
    #[instrument(skip_all, fields(base_url = %config.api_base_url))]
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::builder()
            .client(ApiClient::new(config.api_base_url.clone(), config.request_timeout)?)
            .session(Arc::new(FileSession::open(&config.session_file)))
            .notifier(Notifier::new(config.toast_duration))
            .build())
    }

    /// Context for a new form; closing the panels closes it too.
    pub fn context(&self) -> FormContext {
        FormContext {
            session: self.session.clone(),
            notifier: self.notifier.clone(),
            lifetime: self.lifetime.child_token(),
        }
    }

    pub fn investor_settings(&self) -> TabSet {
        TabSet::investor(&self.client, &self.context())
    }

    /// Form for a resource by name (see [`resources::FORM_NAMES`]).
    pub fn form(&self, name: &str, id: Option<&str>) -> Option<Arc<dyn SyncedForm>> {
        resources::open_form(name, id, &self.client, &self.context())
    }

    /// The security tab as a typed form, for the password-change sub-action.
    pub fn security(&self) -> ResourceForm<ResourceAdapter<SecurityPrivacy>> {
        ResourceForm::new(ResourceAdapter::new(self.client.clone()), &self.context())
    }

    pub fn team(&self) -> TeamRoster {
        TeamRoster::new(self.client.clone(), &self.context())
    }

    /// Document library; every library from these panels announces
    /// generations on the same channel.
    pub fn documents(&self) -> DocumentLibrary {
        DocumentLibrary::with_events(self.client.clone(), &self.context(), self.documents_updated.clone())
    }

    /// Close every form handed out; in-flight results are discarded.
    pub fn close(&self) {
        self.lifetime.cancel();
    }
}
