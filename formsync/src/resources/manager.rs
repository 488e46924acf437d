//! Syndicate manager settings.
//!
//! Singletons live under `syndicate/settings/<resource>/` and take partial
//! `PATCH` updates. Bank accounts, cards and compliance documents are
//! collections: a new item is `POST`ed, an existing one `PATCH`ed at its id.

use crate::adapter::{Resource, WriteMode};
use crate::schema::FieldSpec;
use crate::upload::UploadPolicy;

pub const JURISDICTIONS: &[&str] = &["US", "UK", "EU", "SG", "CH", "AE", "KY"];

pub struct JurisdictionSelection;

impl Resource for JurisdictionSelection {
    const NAME: &'static str = "Jurisdiction";
    const PATH: &'static str = "syndicate/settings/jurisdiction/";
    const ENVELOPE: &'static [&'static str] = &["jurisdiction"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::choice("primary_jurisdiction", JURISDICTIONS).or_empty(),
        FieldSpec::choice_list("operating_jurisdictions", JURISDICTIONS),
        FieldSpec::choice("entity_type", &["llc", "lp", "spv", "fund"]).or_empty(),
        FieldSpec::boolean("accepts_non_accredited"),
    ];
    const WRITE: WriteMode = WriteMode::Update;
}

pub struct KybVerification;

impl Resource for KybVerification {
    const NAME: &'static str = "KYB verification";
    const PATH: &'static str = "syndicate/settings/kyb/";
    const ENVELOPE: &'static [&'static str] = &["kyb", "kyb_verification"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("company_name"),
        FieldSpec::text("registration_number"),
        FieldSpec::text("incorporation_country"),
        FieldSpec::text("incorporation_date"),
        FieldSpec::text("registered_address"),
        FieldSpec::list("beneficial_owners"),
        FieldSpec::text("verification_status").read_only(),
        FieldSpec::text("registration_document_url").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Update;
    const OPTIONAL: bool = true;
    const UPLOAD: Option<UploadPolicy> = Some(UploadPolicy::new("registration_document", 5));
}

pub struct ComplianceDocument;

impl Resource for ComplianceDocument {
    const NAME: &'static str = "Compliance document";
    const PATH: &'static str = "syndicate/settings/compliance-documents/";
    const ENVELOPE: &'static [&'static str] = &["document"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("title"),
        FieldSpec::choice(
            "document_type",
            &["policy", "certificate", "audit_report", "license", "other"],
        ),
        FieldSpec::text("jurisdiction"),
        FieldSpec::text("expiry_date"),
        FieldSpec::text("status").read_only(),
        FieldSpec::text("file_url").wire("file").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Create;
    const COLLECTION: bool = true;
    const UPLOAD: Option<UploadPolicy> = Some(
        UploadPolicy::new("file", 25)
            .types(
                &["pdf", "doc", "docx", "jpg", "jpeg", "png"],
                &[
                    "application/pdf",
                    "application/msword",
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                    "image/jpeg",
                    "image/png",
                ],
            )
            .required(),
    );
}

pub struct BankAccount;

impl Resource for BankAccount {
    const NAME: &'static str = "Bank account";
    const PATH: &'static str = "syndicate/settings/bank-accounts/";
    const ENVELOPE: &'static [&'static str] = &["bank_account"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("account_holder_name"),
        FieldSpec::text("bank_name"),
        FieldSpec::text("account_number"),
        FieldSpec::text("routing_number"),
        FieldSpec::text("iban"),
        FieldSpec::text("swift_code"),
        FieldSpec::choice("currency", &["USD", "EUR", "GBP", "CHF", "SGD"]),
        FieldSpec::choice("account_type", &["checking", "savings", "business"]),
        FieldSpec::boolean("is_primary"),
        FieldSpec::text("verification_status").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Create;
    const COLLECTION: bool = true;
    const UPLOAD: Option<UploadPolicy> = Some(UploadPolicy::new("recipient_id_document", 1));
}

pub struct Card;

impl Resource for Card {
    const NAME: &'static str = "Card";
    const PATH: &'static str = "syndicate/settings/cards/";
    const ENVELOPE: &'static [&'static str] = &["card"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("cardholder_name"),
        FieldSpec::text("card_token"),
        FieldSpec::text("billing_address"),
        FieldSpec::text("billing_postal_code"),
        FieldSpec::boolean("is_default"),
        FieldSpec::text("brand").read_only(),
        FieldSpec::text("last4").read_only(),
        FieldSpec::number("exp_month").read_only(),
        FieldSpec::number("exp_year").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Create;
    const COLLECTION: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, ResourceAdapter};
    use crate::client::ApiClient;
    use crate::driver::{FormContext, ResourceForm};
    use crate::form::FormState;
    use crate::notifications::Notifier;
    use crate::session::MemorySession;
    use crate::upload::FileUpload;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(server.uri().parse().unwrap(), None).unwrap()
    }

    #[tokio::test]
    async fn jurisdiction_saves_with_patch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/jurisdiction/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jurisdiction": {"primary_jurisdiction": "UK", "operating_jurisdictions": ["UK", "XX", "UK"]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/syndicate/settings/jurisdiction/"))
            .and(body_partial_json(json!({"operating_jurisdictions": ["UK", "SG"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = FormContext::new(Arc::new(MemorySession::with_token("t")), Notifier::default());
        let form = ResourceForm::new(ResourceAdapter::<JurisdictionSelection>::new(client(&server)), &ctx);
        form.load().await.unwrap();
        assert_eq!(form.form().get("operating_jurisdictions"), Some(&json!(["UK"])));

        form.set_array_membership("operating_jurisdictions", "SG", true).unwrap();
        form.set_array_membership("operating_jurisdictions", "SG", true).unwrap();
        form.save().await.unwrap();
    }

    #[tokio::test]
    async fn compliance_document_requires_a_file_on_create() {
        let server = MockServer::start().await;
        let adapter = ResourceAdapter::<ComplianceDocument>::new(client(&server));

        let form = FormState::new(ComplianceDocument::FIELDS);
        let err = adapter.save(Some("t"), &form).await.unwrap_err();
        assert_eq!(err.user_message(), "Please select a file to upload");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compliance_documents_accept_word_files_up_to_25mb() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/syndicate/settings/compliance-documents/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 12})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = ResourceAdapter::<ComplianceDocument>::new(client(&server));
        let mut form = FormState::new(ComplianceDocument::FIELDS);
        form.set_field("title", json!("AML policy")).unwrap();

        form.attach_file("file", FileUpload::new("policy.docx", vec![0u8; 26 * 1024 * 1024]));
        let err = adapter.save(Some("t"), &form).await.unwrap_err();
        assert_eq!(err.user_message(), "File size exceeds 25MB limit. Selected file is 26.00 MB");

        form.attach_file("file", FileUpload::new("policy.docx", vec![0u8; 1024]));
        let ack = adapter.save(Some("t"), &form).await.unwrap();
        assert_eq!(ack.id().as_deref(), Some("12"));
    }

    #[tokio::test]
    async fn bank_recipient_id_limit_is_1mb() {
        let server = MockServer::start().await;
        let adapter = ResourceAdapter::<BankAccount>::for_item(client(&server), "3");
        let mut form = FormState::new(BankAccount::FIELDS);
        form.attach_file("recipient_id_document", FileUpload::new("id.png", vec![0u8; 1536 * 1024]));

        let err = adapter.save(Some("t"), &form).await.unwrap_err();
        assert_eq!(err.user_message(), "File size exceeds 1MB limit. Selected file is 1.50 MB");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_card_is_fetched_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/cards/4/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 4, "cardholder_name": "Ada", "brand": "visa", "last4": "4242", "exp_month": 12
            })))
            .mount(&server)
            .await;

        let card = ResourceAdapter::<Card>::for_item(client(&server), "4").fetch(Some("t")).await.unwrap();
        assert_eq!(card.get("last4"), Some(&json!("4242")));
        assert_eq!(card.get("exp_month"), Some(&json!(12.0)));
        assert_eq!(card.get("is_default"), Some(&json!(false)));
    }
}
