//! Investor settings: eight singleton resources, one per settings tab.
//!
//! All of them live under `investors/settings/<resource>/` and are written
//! back with a full `PUT`.

use reqwest::Method;
use serde_json::json;

use crate::adapter::{Resource, ResourceAdapter, WriteMode, require_token};
use crate::client::{ApiClient, Body};
use crate::driver::ResourceForm;
use crate::errors::{Error, Result};
use crate::schema::FieldSpec;
use crate::upload::UploadPolicy;

pub struct Identity;

impl Resource for Identity {
    const NAME: &'static str = "Identity";
    const PATH: &'static str = "investors/settings/identity/";
    const ENVELOPE: &'static [&'static str] = &["identity"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("full_name").wire("full_legal_name"),
        FieldSpec::text("date_of_birth"),
        FieldSpec::text("nationality"),
        FieldSpec::text("country_of_residence"),
        FieldSpec::text("phone_number"),
        FieldSpec::text("address_line_1").wire("address.line_1"),
        FieldSpec::text("address_line_2").wire("address.line_2"),
        FieldSpec::text("city").wire("address.city"),
        FieldSpec::text("postal_code").wire("address.postal_code"),
        FieldSpec::text("verification_status").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
    const OPTIONAL: bool = true;
}

pub struct Accreditation;

impl Resource for Accreditation {
    const NAME: &'static str = "Accreditation";
    const PATH: &'static str = "investors/settings/accreditation/";
    const ENVELOPE: &'static [&'static str] = &["accreditation"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::choice(
            "accreditation_type",
            &["individual_income", "individual_net_worth", "professional", "entity"],
        )
        .or_empty(),
        FieldSpec::text("jurisdiction"),
        FieldSpec::text("expiry_date").wire("accreditation_expiry_date"),
        FieldSpec::boolean("self_certified"),
        FieldSpec::text("status").read_only(),
        FieldSpec::text("proof_document_url").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
    const OPTIONAL: bool = true;
    const UPLOAD: Option<UploadPolicy> = Some(UploadPolicy::new("proof_document", 5));
}

pub struct TaxCompliance;

impl Resource for TaxCompliance {
    const NAME: &'static str = "Tax compliance";
    const PATH: &'static str = "investors/settings/tax-compliance/";
    const ENVELOPE: &'static [&'static str] = &["tax_compliance", "tax"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("tax_residency"),
        FieldSpec::boolean("us_person"),
        FieldSpec::text("tax_id").wire("tin"),
        FieldSpec::choice("tax_form_type", &["w9", "w8ben", "w8bene"]).or_empty(),
        FieldSpec::choice("fatca_status", &["exempt", "participating", "non_participating"]).or_empty(),
        FieldSpec::boolean("crs_self_certified"),
        FieldSpec::text("status").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
    const OPTIONAL: bool = true;
}

pub struct Eligibility;

impl Resource for Eligibility {
    const NAME: &'static str = "Eligibility";
    const PATH: &'static str = "investors/settings/eligibility/";
    const ENVELOPE: &'static [&'static str] = &["eligibility"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::choice("investor_type", &["individual", "entity", "trust"]),
        FieldSpec::boolean("is_qualified_purchaser"),
        FieldSpec::choice("investment_experience", &["none", "limited", "moderate", "extensive"]),
        FieldSpec::choice("risk_tolerance", &["conservative", "moderate", "aggressive"]),
        FieldSpec::boolean("acknowledges_illiquidity"),
        FieldSpec::boolean("acknowledges_risk_of_loss"),
        FieldSpec::text("eligibility_status").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
    const OPTIONAL: bool = true;
}

pub struct Financial;

impl Resource for Financial {
    const NAME: &'static str = "Financial";
    const PATH: &'static str = "investors/settings/financial/";
    const ENVELOPE: &'static [&'static str] = &["financial"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::number("annual_income"),
        FieldSpec::number("net_worth"),
        FieldSpec::number("liquid_net_worth"),
        FieldSpec::text("source_of_funds"),
        FieldSpec::choice("currency", &["USD", "EUR", "GBP", "CHF", "SGD"]),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
    const OPTIONAL: bool = true;
}

pub const DEAL_STAGES: &[&str] = &["pre_seed", "seed", "series_a", "series_b", "growth", "late_stage"];
pub const SECTORS: &[&str] = &["fintech", "healthtech", "climate", "saas", "consumer", "deeptech", "real_estate"];

pub struct Portfolio;

impl Resource for Portfolio {
    const NAME: &'static str = "Portfolio";
    const PATH: &'static str = "investors/settings/portfolio/";
    const ENVELOPE: &'static [&'static str] = &["portfolio"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::choice_list("deal_stage_preferences", DEAL_STAGES),
        FieldSpec::choice_list("sector_preferences", SECTORS),
        FieldSpec::number("min_ticket_size"),
        FieldSpec::number("max_ticket_size"),
        FieldSpec::boolean("whitelist_secondary_trading"),
        FieldSpec::boolean("show_portfolio_publicly"),
        FieldSpec::number("total_investments").read_only(),
        FieldSpec::number("active_deals_count").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
}

pub const SESSION_TIMEOUTS: &[i64] = &[15, 30, 60, 120, 240];

pub struct SecurityPrivacy;

impl Resource for SecurityPrivacy {
    const NAME: &'static str = "Security & privacy";
    const PATH: &'static str = "investors/settings/security/";
    const ENVELOPE: &'static [&'static str] = &["security", "security_privacy"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::boolean("two_factor_enabled"),
        FieldSpec::int_choice("session_timeout_minutes", SESSION_TIMEOUTS, 30),
        FieldSpec::boolean("login_alerts").default_true(),
        FieldSpec::choice("profile_visibility", &["private", "syndicate_only", "public"]),
        FieldSpec::boolean("share_data_with_syndicates"),
        FieldSpec::text("last_password_change").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
}

pub const CURRENT_PASSWORD: &str = "current_password";
pub const NEW_PASSWORD: &str = "new_password";
pub const CONFIRM_PASSWORD: &str = "confirm_password";
const MIN_PASSWORD_LENGTH: usize = 8;

/// Check the transient password fields before anything is sent.
pub fn validate_password_change(current: Option<&str>, new: Option<&str>, confirm: Option<&str>) -> Result<()> {
    let (Some(current), Some(new), Some(confirm)) = (
        current.filter(|s| !s.is_empty()),
        new.filter(|s| !s.is_empty()),
        confirm.filter(|s| !s.is_empty()),
    ) else {
        return Err(Error::validation("Please fill in all password fields"));
    };

    if new.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::validation(format!(
            "New password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if new != confirm {
        return Err(Error::validation("New passwords do not match"));
    }
    if new == current {
        return Err(Error::validation("New password must be different from the current password"));
    }
    Ok(())
}

/// Submit the password-change inputs held as transient fields on the
/// security tab. The inputs are cleared once the server accepts them.
pub async fn change_password(client: &ApiClient, form: &ResourceForm<ResourceAdapter<SecurityPrivacy>>) -> Result<()> {
    form.perform("Password updated successfully", |token, state| async move {
        let token = require_token(token.as_deref())?.to_string();
        validate_password_change(
            state.transient(CURRENT_PASSWORD),
            state.transient(NEW_PASSWORD),
            state.transient(CONFIRM_PASSWORD),
        )?;
        let body = json!({
            "current_password": state.transient(CURRENT_PASSWORD),
            "new_password": state.transient(NEW_PASSWORD),
            "confirm_password": state.transient(CONFIRM_PASSWORD),
        });
        client
            .send(
                Method::POST,
                &format!("{}change-password/", SecurityPrivacy::PATH),
                &token,
                Body::Json(body),
                &["current_password", "new_password", "confirm_password"],
            )
            .await?;
        Ok(())
    })
    .await?;
    form.clear_transient();
    Ok(())
}

pub const CAPITAL_CALL_CHANNELS: &[&str] = &["email", "sms", "in_app"];
pub const EVENT_ALERTS: &[&str] = &["new_deals", "deal_updates", "portfolio_updates", "distributions", "events"];

pub struct Communication;

impl Resource for Communication {
    const NAME: &'static str = "Communication";
    const PATH: &'static str = "investors/settings/communication/";
    const ENVELOPE: &'static [&'static str] = &["communication", "preferences"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::boolean("email_notifications").default_true(),
        FieldSpec::boolean("sms_notifications"),
        FieldSpec::choice("preferred_language", &["en", "fr", "de", "es"]),
        FieldSpec::choice("digest_frequency", &["daily", "weekly", "monthly", "never"]).default_str("weekly"),
        FieldSpec::group("capital_call_notifications", CAPITAL_CALL_CHANNELS).wire("notification_preferences.capital_calls"),
        FieldSpec::group("event_alerts", EVENT_ALERTS).wire("notification_preferences.events"),
        FieldSpec::boolean("newsletter_opt_in"),
    ];
    const WRITE: WriteMode = WriteMode::Replace;
}
