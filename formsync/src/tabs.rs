//! The investor settings page: one form per tab, each loaded the first time
//! its tab is shown.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::adapter::ResourceAdapter;
use crate::client::ApiClient;
use crate::driver::{FormContext, ResourceForm, SyncedForm};
use crate::errors::Result;
use crate::resources::investor::{
    Accreditation, Communication, Eligibility, Financial, Identity, Portfolio, SecurityPrivacy, TaxCompliance,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tab {
    Identity,
    Accreditation,
    TaxCompliance,
    Eligibility,
    Financial,
    Portfolio,
    SecurityPrivacy,
    Communication,
}

impl Tab {
    pub const ALL: [Tab; 8] = [
        Tab::Identity,
        Tab::Accreditation,
        Tab::TaxCompliance,
        Tab::Eligibility,
        Tab::Financial,
        Tab::Portfolio,
        Tab::SecurityPrivacy,
        Tab::Communication,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Tab::Identity => "identity",
            Tab::Accreditation => "accreditation",
            Tab::TaxCompliance => "tax-compliance",
            Tab::Eligibility => "eligibility",
            Tab::Financial => "financial",
            Tab::Portfolio => "portfolio",
            Tab::SecurityPrivacy => "security",
            Tab::Communication => "communication",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Tab {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Tab::ALL
            .into_iter()
            .find(|tab| tab.slug() == s)
            .ok_or_else(|| format!("unknown settings tab: {s}"))
    }
}

pub struct TabSet {
    forms: BTreeMap<Tab, Arc<dyn SyncedForm>>,
    active: Mutex<Option<Tab>>,
    loaded: Mutex<HashSet<Tab>>,
}

impl TabSet {
    /// One form per investor settings tab, all sharing `ctx`.
    pub fn investor(client: &ApiClient, ctx: &FormContext) -> Self {
        fn form<A: crate::adapter::Adapter + 'static>(adapter: A, ctx: &FormContext) -> Arc<dyn SyncedForm> {
            Arc::new(ResourceForm::new(adapter, ctx))
        }

        let forms = BTreeMap::from([
            (Tab::Identity, form(ResourceAdapter::<Identity>::new(client.clone()), ctx)),
            (Tab::Accreditation, form(ResourceAdapter::<Accreditation>::new(client.clone()), ctx)),
            (Tab::TaxCompliance, form(ResourceAdapter::<TaxCompliance>::new(client.clone()), ctx)),
            (Tab::Eligibility, form(ResourceAdapter::<Eligibility>::new(client.clone()), ctx)),
            (Tab::Financial, form(ResourceAdapter::<Financial>::new(client.clone()), ctx)),
            (Tab::Portfolio, form(ResourceAdapter::<Portfolio>::new(client.clone()), ctx)),
            (Tab::SecurityPrivacy, form(ResourceAdapter::<SecurityPrivacy>::new(client.clone()), ctx)),
            (Tab::Communication, form(ResourceAdapter::<Communication>::new(client.clone()), ctx)),
        ]);
        Self::from_forms(forms)
    }

    pub fn from_forms(forms: BTreeMap<Tab, Arc<dyn SyncedForm>>) -> Self {
        Self {
            forms,
            active: Mutex::new(None),
            loaded: Mutex::new(HashSet::new()),
        }
    }

    pub fn form(&self, tab: Tab) -> Option<Arc<dyn SyncedForm>> {
        self.forms.get(&tab).cloned()
    }

    pub fn active(&self) -> Option<Tab> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Show `tab`. The first activation starts its load in the background and
    /// returns the handle; revisits never re-fetch.
    pub fn activate(&self, tab: Tab) -> Option<JoinHandle<Result<()>>> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(tab);

        let form = self.forms.get(&tab)?.clone();
        let first_visit = self.loaded.lock().unwrap_or_else(|e| e.into_inner()).insert(tab);
        if !first_visit {
            debug!(%tab, "Tab already loaded");
            return None;
        }

        debug!(%tab, "Loading tab");
        Some(tokio::spawn(async move { form.load().await }))
    }

    /// Close every form; in-flight loads are discarded.
    pub fn close(&self) {
        for form in self.forms.values() {
            form.close();
        }
    }
}
