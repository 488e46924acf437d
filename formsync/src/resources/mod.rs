//! Concrete resources served by the panels.

pub mod documents;
pub mod investor;
pub mod manager;
pub mod team;

use std::sync::Arc;

use crate::adapter::{Adapter, Resource, ResourceAdapter};
use crate::client::ApiClient;
use crate::driver::{FormContext, ResourceForm, SyncedForm};

/// Names accepted by [`open_form`], in display order.
pub const FORM_NAMES: &[&str] = &[
    "identity",
    "accreditation",
    "tax-compliance",
    "eligibility",
    "financial",
    "portfolio",
    "security",
    "communication",
    "jurisdiction",
    "kyb",
    "compliance-document",
    "bank-account",
    "card",
];

fn boxed<A: Adapter + 'static>(adapter: A, ctx: &FormContext) -> Arc<dyn SyncedForm> {
    Arc::new(ResourceForm::new(adapter, ctx))
}

fn adapter<R: Resource>(client: &ApiClient, id: Option<&str>) -> ResourceAdapter<R> {
    match id {
        Some(id) if R::COLLECTION => ResourceAdapter::for_item(client.clone(), id),
        _ => ResourceAdapter::new(client.clone()),
    }
}

/// Build the form for a resource by name. `id` addresses an existing item of
/// a collection resource and is ignored for singletons.
pub fn open_form(name: &str, id: Option<&str>, client: &ApiClient, ctx: &FormContext) -> Option<Arc<dyn SyncedForm>> {
    use investor::*;
    use manager::*;

    let form = match name {
        "identity" => boxed(adapter::<Identity>(client, id), ctx),
        "accreditation" => boxed(adapter::<Accreditation>(client, id), ctx),
        "tax-compliance" => boxed(adapter::<TaxCompliance>(client, id), ctx),
        "eligibility" => boxed(adapter::<Eligibility>(client, id), ctx),
        "financial" => boxed(adapter::<Financial>(client, id), ctx),
        "portfolio" => boxed(adapter::<Portfolio>(client, id), ctx),
        "security" => boxed(adapter::<SecurityPrivacy>(client, id), ctx),
        "communication" => boxed(adapter::<Communication>(client, id), ctx),
        "jurisdiction" => boxed(adapter::<JurisdictionSelection>(client, id), ctx),
        "kyb" => boxed(adapter::<KybVerification>(client, id), ctx),
        "compliance-document" => boxed(adapter::<ComplianceDocument>(client, id), ctx),
        "bank-account" => boxed(adapter::<BankAccount>(client, id), ctx),
        "card" => boxed(adapter::<Card>(client, id), ctx),
        _ => return None,
    };
    Some(form)
}
