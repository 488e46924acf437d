//! Team management.
//!
//! Unlike the settings forms, the team page edits many members at once. Edits
//! accumulate in a [`ChangeSet`] keyed by member id and go out together in
//! [`TeamRoster::save_all`]:
//!
//! - a changed `role` becomes one `update_role` sub-action,
//! - any changed permission becomes one `update_permissions` sub-action
//!   carrying the member's full permission set,
//! - every other changed field is sent in a single `PATCH`.
//!
//! All calls run concurrently. Each successful call clears the fields it
//! covered; the roster is then re-listed and edits that failed are re-applied
//! on top of the fresh rows.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{StreamExt, stream};
use serde_json::{Map, Value, json};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{Resource, WriteMode, require_token};
use crate::client::{ApiClient, Body};
use crate::collection::CollectionClient;
use crate::driver::{FormContext, Phase, guarded};
use crate::errors::{Error, Result};
use crate::form::NormalizedForm;
use crate::notifications::Notifier;
use crate::schema::{self, FieldSpec};
use crate::session::Session;

pub const ROLES: &[&str] = &["viewer", "analyst", "manager", "admin"];

pub const PERMISSIONS: &[&str] = &[
    "can_manage_deals",
    "can_manage_investors",
    "can_manage_team",
    "can_manage_documents",
    "can_view_reports",
];

const ROLE: &str = "role";

pub struct TeamMember;

impl Resource for TeamMember {
    const NAME: &'static str = "Team member";
    const PATH: &'static str = "syndicate/settings/team-members/";
    const ENVELOPE: &'static [&'static str] = &["member"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::text("email").read_only(),
        FieldSpec::text("name").wire("full_name").read_only(),
        FieldSpec::choice(ROLE, ROLES),
        FieldSpec::boolean("can_manage_deals"),
        FieldSpec::boolean("can_manage_investors"),
        FieldSpec::boolean("can_manage_team"),
        FieldSpec::boolean("can_manage_documents"),
        FieldSpec::boolean("can_view_reports"),
        FieldSpec::text("title"),
        FieldSpec::boolean("is_active").default_true(),
        FieldSpec::text("status").read_only(),
        FieldSpec::text("joined_at").read_only(),
    ];
    const WRITE: WriteMode = WriteMode::Update;
    const COLLECTION: bool = true;
}

/// Pending edits: member id to the fields that differ from the last listing.
pub type ChangeSet = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: String,
    /// Values as last listed by the server
    pub values: NormalizedForm,
}

impl Member {
    fn from_row(row: Value) -> Option<Self> {
        let Value::Object(record) = row else { return None };
        let id = match record.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            id,
            values: NormalizedForm::from_wire(TeamMember::FIELDS, &record),
        })
    }
}

/// Outcome of a bulk save.
#[derive(Debug, Default)]
pub struct SaveReport {
    /// `(member id, field)` pairs the server accepted
    pub saved: Vec<(String, String)>,
    pub failed: Vec<(String, Error)>,
}

impl SaveReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One outgoing call and the fields it settles.
struct Call {
    id: String,
    fields: Vec<(String, Value)>,
    action: CallKind,
}

enum CallKind {
    Role(Value),
    Permissions(Map<String, Value>),
    Patch(Map<String, Value>),
}

struct Roster {
    phase: Phase,
    members: Vec<Member>,
    changes: ChangeSet,
}

pub struct TeamRoster {
    members: CollectionClient,
    session: Arc<dyn Session>,
    notifier: Notifier,
    lifetime: CancellationToken,
    in_flight: Semaphore,
    roster: Mutex<Roster>,
}

impl TeamRoster {
    pub fn new(client: ApiClient, ctx: &FormContext) -> Self {
        Self {
            members: CollectionClient::new(client, TeamMember::PATH)
                .with_error_fields(&["email", "role", "permissions"]),
            session: ctx.session.clone(),
            notifier: ctx.notifier.clone(),
            lifetime: ctx.lifetime.child_token(),
            in_flight: Semaphore::new(1),
            roster: Mutex::new(Roster {
                phase: Phase::Idle,
                members: Vec::new(),
                changes: ChangeSet::new(),
            }),
        }
    }

    fn roster(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.in_flight.try_acquire().map_err(|_| Error::Busy {
            resource: TeamMember::NAME.to_string(),
        })
    }

    fn token(&self) -> Result<String> {
        let token = self.session.access_token();
        Ok(require_token(token.as_deref())?.to_string())
    }

    pub fn phase(&self) -> Phase {
        self.roster().phase.clone()
    }

    /// Members as last listed, without pending edits
    pub fn members(&self) -> Vec<Member> {
        self.roster().members.clone()
    }

    pub fn changes(&self) -> ChangeSet {
        self.roster().changes.clone()
    }

    /// A member's values with pending edits applied
    pub fn current(&self, id: &str) -> Option<NormalizedForm> {
        let roster = self.roster();
        let member = roster.members.iter().find(|m| m.id == id)?;
        Some(match roster.changes.get(id) {
            Some(edits) => member.values.merged(edits),
            None => member.values.clone(),
        })
    }

    pub async fn load(&self) -> Result<()> {
        let _permit = self.acquire()?;
        self.reload().await
    }

    /// List with the permit already held. Pending edits that still differ
    /// from the fresh rows survive; edits for members that are gone do not.
    async fn reload(&self) -> Result<()> {
        self.roster().phase = Phase::Loading;

        let listed = async {
            let token = self.token()?;
            self.members.list_all::<Value>(&token).await
        };
        match guarded(&self.lifetime, TeamMember::NAME, listed).await {
            Ok(rows) => {
                let members: Vec<Member> = rows.into_iter().filter_map(Member::from_row).collect();
                let mut roster = self.roster();
                let mut changes = std::mem::take(&mut roster.changes);
                changes.retain(|id, edits| {
                    let Some(member) = members.iter().find(|m| &m.id == id) else {
                        return false;
                    };
                    edits.retain(|field, value| member.values.get(field) != Some(&*value));
                    !edits.is_empty()
                });
                debug!(count = members.len(), pending = changes.len(), "Roster listed");
                roster.members = members;
                roster.changes = changes;
                roster.phase = Phase::Ready;
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "Failed to list team members");
                self.roster().phase = Phase::Error(e.user_message());
                Err(e)
            }
        }
    }

    /// Record an edit. Setting a field back to its listed value removes it
    /// from the change set, and a member with no remaining edits drops out.
    pub fn set_field(&self, id: &str, field: &str, value: Value) -> Result<()> {
        let spec = schema::field(TeamMember::FIELDS, field)
            .filter(|f| !f.read_only)
            .ok_or_else(|| Error::validation(format!("{field} is not an editable team member field")))?;
        if let schema::FieldKind::Choice(choices) = spec.kind {
            if !value.as_str().is_some_and(|v| choices.contains(&v)) {
                return Err(Error::validation(format!("{value} is not a valid {field}")));
            }
        }
        let value = schema::to_wire(spec, &value);

        let mut roster = self.roster();
        let baseline = roster
            .members
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::validation(format!("No team member with id {id}")))?
            .values
            .get(field)
            .cloned();

        if baseline.as_ref() == Some(&value) {
            if let Some(edits) = roster.changes.get_mut(id) {
                edits.remove(field);
                if edits.is_empty() {
                    roster.changes.remove(id);
                }
            }
        } else {
            roster
                .changes
                .entry(id.to_string())
                .or_default()
                .insert(field.to_string(), value);
        }
        Ok(())
    }

    pub fn toggle_field(&self, id: &str, field: &str) -> Result<bool> {
        if !schema::field(TeamMember::FIELDS, field).is_some_and(FieldSpec::is_boolean) {
            return Err(Error::validation(format!("{field} is not a toggle")));
        }
        let current = self
            .current(id)
            .ok_or_else(|| Error::validation(format!("No team member with id {id}")))?;
        let next = !current.get(field).map(schema::truthy).unwrap_or(false);
        self.set_field(id, field, Value::Bool(next))?;
        Ok(next)
    }

    fn plan(&self, changes: &ChangeSet) -> Vec<Call> {
        let mut calls = Vec::new();
        for (id, edits) in changes {
            let mut patch = Map::new();
            let mut patch_fields = Vec::new();
            let mut permission_fields = Vec::new();

            for (field, value) in edits {
                if field == ROLE {
                    calls.push(Call {
                        id: id.clone(),
                        fields: vec![(field.clone(), value.clone())],
                        action: CallKind::Role(value.clone()),
                    });
                } else if PERMISSIONS.contains(&field.as_str()) {
                    permission_fields.push((field.clone(), value.clone()));
                } else {
                    let wire = schema::field(TeamMember::FIELDS, field).map_or(field.as_str(), |f| f.wire);
                    schema::write_path(&mut patch, wire, value.clone());
                    patch_fields.push((field.clone(), value.clone()));
                }
            }

            if !permission_fields.is_empty() {
                let current = self.current(id);
                let permissions = PERMISSIONS
                    .iter()
                    .map(|p| {
                        let on = current.as_ref().and_then(|c| c.get(p)).map(schema::truthy).unwrap_or(false);
                        (p.to_string(), Value::Bool(on))
                    })
                    .collect();
                calls.push(Call {
                    id: id.clone(),
                    fields: permission_fields,
                    action: CallKind::Permissions(permissions),
                });
            }
            if !patch.is_empty() {
                calls.push(Call {
                    id: id.clone(),
                    fields: patch_fields,
                    action: CallKind::Patch(patch),
                });
            }
        }
        calls
    }

    async fn dispatch(&self, token: &str, call: &Call) -> Result<Value> {
        match &call.action {
            CallKind::Role(role) => {
                self.members
                    .action(token, &call.id, "update_role", json!({ "role": role }))
                    .await
            }
            CallKind::Permissions(permissions) => {
                self.members
                    .action(token, &call.id, "update_permissions", json!({ "permissions": permissions }))
                    .await
            }
            CallKind::Patch(patch) => {
                self.members
                    .update(token, &call.id, Body::Json(Value::Object(patch.clone())))
                    .await
            }
        }
    }

    /// Send every pending edit, then re-list.
    #[instrument(skip(self))]
    pub async fn save_all(&self) -> Result<SaveReport> {
        let _permit = self.acquire()?;
        {
            let roster = self.roster();
            if roster.members.is_empty() && roster.phase != Phase::Ready {
                return Err(Error::NoBaseline {
                    resource: TeamMember::NAME.to_string(),
                });
            }
        }

        let changes = self.changes();
        if changes.is_empty() {
            debug!("Nothing to save");
            return Ok(SaveReport::default());
        }

        let token = self.token()?;
        let calls = self.plan(&changes);
        info!(members = changes.len(), calls = calls.len(), "Saving team changes");

        let outcomes = guarded(
            &self.lifetime,
            TeamMember::NAME,
            async {
                Ok(stream::iter(calls.iter().map(|call| self.dispatch(&token, call)))
                    .buffered(calls.len().max(1))
                    .collect::<Vec<_>>()
                    .await)
            },
        )
        .await?;

        let mut report = SaveReport::default();
        {
            let mut roster = self.roster();
            for (call, outcome) in calls.into_iter().zip(outcomes) {
                match outcome {
                    Ok(_) => {
                        if let Some(edits) = roster.changes.get_mut(&call.id) {
                            for (field, sent) in &call.fields {
                                // an edit made while the call was in flight stays pending
                                if edits.get(field) == Some(sent) {
                                    edits.remove(field);
                                }
                            }
                            if edits.is_empty() {
                                roster.changes.remove(&call.id);
                            }
                        }
                        report
                            .saved
                            .extend(call.fields.into_iter().map(|(field, _)| (call.id.clone(), field)));
                    }
                    Err(e) => {
                        warn!(member = %call.id, error = %e, "Team member update failed");
                        report.failed.push((call.id, e));
                    }
                }
            }
        }

        match report.failed.first() {
            None => {
                self.notifier.success(TeamMember::NAME, "Team changes saved successfully");
            }
            Some((id, e)) => {
                self.notifier
                    .error(TeamMember::NAME, format!("Failed to update member {id}: {}", e.user_message()));
            }
        }

        if let Err(e) = self.reload().await {
            debug!(error = %e, "Re-list after bulk save failed");
        }
        Ok(report)
    }

    /// Invite a new member by email.
    #[instrument(skip(self))]
    pub async fn invite(&self, email: &str, role: &str) -> Result<Value> {
        let _permit = self.acquire()?;
        if !ROLES.contains(&role) {
            return Err(Error::validation(format!("{role} is not a valid role")));
        }
        let token = self.token()?;
        let created = guarded(
            &self.lifetime,
            TeamMember::NAME,
            self.members
                .create(&token, Body::Json(json!({ "email": email, "role": role }))),
        )
        .await;
        match created {
            Ok(body) => {
                self.notifier.success(TeamMember::NAME, format!("Invitation sent to {email}"));
                if let Err(e) = self.reload().await {
                    debug!(error = %e, "Re-list after invite failed");
                }
                Ok(body)
            }
            Err(e) => {
                self.notifier.error(TeamMember::NAME, e.user_message());
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _permit = self.acquire()?;
        let token = self.token()?;
        match guarded(&self.lifetime, TeamMember::NAME, self.members.delete(&token, id)).await {
            Ok(()) => {
                self.roster().changes.remove(id);
                self.notifier.success(TeamMember::NAME, "Team member removed");
                if let Err(e) = self.reload().await {
                    debug!(error = %e, "Re-list after removal failed");
                }
                Ok(())
            }
            Err(e) => {
                self.notifier.error(TeamMember::NAME, e.user_message());
                Err(e)
            }
        }
    }

    pub fn close(&self) {
        self.lifetime.cancel();
    }
}

impl Drop for TeamRoster {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(id: u64, role: &str, can_manage_team: bool) -> Value {
        json!({
            "id": id,
            "email": format!("member{id}@example.com"),
            "full_name": format!("Member {id}"),
            "role": role,
            "can_manage_team": can_manage_team,
            "can_view_reports": true,
            "status": "active"
        })
    }

    fn ctx() -> FormContext {
        FormContext::new(Arc::new(MemorySession::with_token("tok")), Notifier::default())
    }

    async fn roster(server: &MockServer, ctx: &FormContext) -> TeamRoster {
        let client = ApiClient::new(server.uri().parse().unwrap(), None).unwrap();
        let roster = TeamRoster::new(client, ctx);
        roster.load().await.unwrap();
        roster
    }

    async fn mount_list(server: &MockServer, rows: Value, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path("/syndicate/settings/team-members/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": rows, "count": 2})));
        match times {
            Some(n) => mock.up_to_n_times(n).mount(server).await,
            None => mock.mount(server).await,
        }
    }

    #[tokio::test]
    async fn change_set_only_holds_real_differences() {
        let server = MockServer::start().await;
        mount_list(&server, json!([row(42, "analyst", false), row(57, "viewer", false)]), None).await;
        let roster = roster(&server, &ctx()).await;

        roster.set_field("42", "role", json!("manager")).unwrap();
        assert_eq!(roster.changes().len(), 1);

        roster.set_field("42", "role", json!("analyst")).unwrap();
        assert!(roster.changes().is_empty());

        assert!(roster.toggle_field("57", "can_manage_team").unwrap());
        assert!(!roster.toggle_field("57", "can_manage_team").unwrap());
        assert!(roster.changes().is_empty());

        assert!(roster.set_field("42", "email", json!("x@y.z")).is_err());
        assert!(roster.set_field("42", "role", json!("overlord")).is_err());
        assert!(roster.set_field("99", "role", json!("admin")).is_err());
    }

    #[tokio::test]
    async fn only_boolean_fields_toggle() {
        let server = MockServer::start().await;
        mount_list(&server, json!([row(42, "analyst", false)]), None).await;
        let roster = roster(&server, &ctx()).await;

        assert!(matches!(roster.toggle_field("42", "title"), Err(Error::Validation { .. })));
        assert!(matches!(roster.toggle_field("42", "role"), Err(Error::Validation { .. })));
        assert!(roster.changes().is_empty());
    }

    #[tokio::test]
    async fn members_on_later_pages_are_editable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/team-members/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [row(57, "viewer", false)],
                "count": 2,
                "next": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/team-members/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [row(42, "analyst", false)],
                "count": 2,
                "next": format!("{}/syndicate/settings/team-members/?page=2", server.uri())
            })))
            .mount(&server)
            .await;

        let roster = roster(&server, &ctx()).await;
        assert_eq!(roster.members().len(), 2);
        roster.set_field("57", "role", json!("manager")).unwrap();
        assert_eq!(roster.changes()["57"]["role"], json!("manager"));
    }

    #[test_log::test(tokio::test)]
    async fn bulk_save_routes_each_change_to_its_sub_action() {
        let server = MockServer::start().await;
        mount_list(&server, json!([row(42, "analyst", false), row(57, "viewer", false)]), Some(1)).await;
        mount_list(&server, json!([row(42, "manager", false), row(57, "viewer", true)]), None).await;
        Mock::given(method("POST"))
            .and(path("/syndicate/settings/team-members/42/update_role/"))
            .and(body_json(json!({"role": "manager"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/syndicate/settings/team-members/57/update_permissions/"))
            .and(body_partial_json(json!({
                "permissions": {"can_manage_team": true, "can_view_reports": true, "can_manage_deals": false}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 57})))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ctx();
        let roster = roster(&server, &ctx).await;
        roster.set_field("42", "role", json!("manager")).unwrap();
        roster.set_field("57", "can_manage_team", json!(true)).unwrap();

        let report = roster.save_all().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.saved.len(), 2);
        assert!(roster.changes().is_empty());
        let members = roster.members();
        assert_eq!(members[0].values.get("role"), Some(&json!("manager")));
        assert_eq!(members[1].values.get("can_manage_team"), Some(&json!(true)));
        assert_eq!(ctx.notifier.active()[0].message, "Team changes saved successfully");
    }

    #[tokio::test]
    async fn failed_calls_keep_their_edits() {
        let server = MockServer::start().await;
        mount_list(&server, json!([row(42, "analyst", false), row(57, "viewer", false)]), None).await;
        Mock::given(method("POST"))
            .and(path("/syndicate/settings/team-members/42/update_role/"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"detail": "Only owners can promote"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/syndicate/settings/team-members/57/"))
            .and(body_json(json!({"title": "Partner"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 57})))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ctx();
        let roster = roster(&server, &ctx).await;
        roster.set_field("42", "role", json!("admin")).unwrap();
        roster.set_field("57", "title", json!("Partner")).unwrap();

        let report = roster.save_all().await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "42");
        let changes = roster.changes();
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["42"]);
        assert_eq!(changes["42"]["role"], json!("admin"));
        assert_eq!(
            ctx.notifier.active()[0].message,
            "Failed to update member 42: Only owners can promote"
        );
    }

    #[tokio::test]
    async fn invite_and_remove_relist() {
        let server = MockServer::start().await;
        mount_list(&server, json!([row(42, "analyst", false)]), None).await;
        Mock::given(method("POST"))
            .and(path("/syndicate/settings/team-members/"))
            .and(body_json(json!({"email": "new@example.com", "role": "viewer"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 60})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/syndicate/settings/team-members/42/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let roster = roster(&server, &ctx()).await;
        roster.invite("new@example.com", "viewer").await.unwrap();
        roster.set_field("42", "role", json!("admin")).unwrap();
        roster.remove("42").await.unwrap();
        assert!(roster.changes().is_empty());

        let gets = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "GET")
            .count();
        assert_eq!(gets, 3);
    }
}
