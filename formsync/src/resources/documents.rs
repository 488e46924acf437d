//! Document templates and generated documents.
//!
//! The server's list of generated documents is the only source of truth.
//! Freshly generated documents are also remembered under the
//! `generatedDocuments` session key, but only as a hint: it lets a view show
//! a document the server has not listed yet, and it is pruned as soon as the
//! server does. Every generation broadcasts [`DocumentsUpdated`] so other open
//! views re-fetch.

use std::sync::Arc;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::adapter::require_token;
use crate::client::{ApiClient, Body};
use crate::collection::{CollectionClient, decode};
use crate::driver::FormContext;
use crate::errors::Result;
use crate::notifications::Notifier;
use crate::session::{GENERATED_DOCUMENTS, Session};

pub const TEMPLATES_PATH: &str = "document-templates/";
pub const GENERATIONS_PATH: &str = "document-generations/";

/// Hints kept in the session; older ones are dropped first.
const MAX_HINTS: usize = 50;

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTemplate {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document_type: String,
    /// Placeholders the generator fills in
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Body for creating or editing a template.
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
pub struct TemplateRequest {
    #[builder(into)]
    pub name: String,
    #[builder(into, default)]
    pub description: String,
    #[builder(into)]
    pub document_type: String,
    #[builder(default)]
    pub required_fields: Vec<String>,
    #[builder(default = true)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub template: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    /// Wizard step the generation is on
    #[serde(default)]
    pub step: Option<u8>,
    pub file_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Body for starting a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
pub struct GenerationRequest {
    #[builder(into)]
    pub template: String,
    #[builder(into)]
    pub title: String,
    /// Placeholder values
    #[builder(default)]
    pub field_values: Map<String, Value>,
    #[builder(into)]
    pub spv: Option<String>,
    #[builder(default)]
    pub investors: Vec<String>,
}

/// Broadcast whenever a document is generated.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentsUpdated {
    pub document_id: String,
}

/// Generated documents as the server lists them, plus hinted documents it has
/// not listed yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentListing {
    pub documents: Vec<GeneratedDocument>,
    pub pending: Vec<GeneratedDocument>,
}

/// Channel for [`DocumentsUpdated`]; hand clones of the sender to every
/// library that should announce to the same subscribers.
pub fn document_events() -> broadcast::Sender<DocumentsUpdated> {
    broadcast::channel(16).0
}

pub struct DocumentLibrary {
    templates: CollectionClient,
    generations: CollectionClient,
    session: Arc<dyn Session>,
    notifier: Notifier,
    events: broadcast::Sender<DocumentsUpdated>,
}

impl DocumentLibrary {
    /// Library with its own event channel. Views that must see each other's
    /// generations share one via [`DocumentLibrary::with_events`].
    pub fn new(client: ApiClient, ctx: &FormContext) -> Self {
        Self::with_events(client, ctx, document_events())
    }

    pub fn with_events(client: ApiClient, ctx: &FormContext, events: broadcast::Sender<DocumentsUpdated>) -> Self {
        Self {
            templates: CollectionClient::new(client.clone(), TEMPLATES_PATH)
                .with_error_fields(&["name", "document_type", "required_fields"]),
            generations: CollectionClient::new(client, GENERATIONS_PATH)
                .with_error_fields(&["template", "title", "field_values"]),
            session: ctx.session.clone(),
            notifier: ctx.notifier.clone(),
            events,
        }
    }

    fn token(&self) -> Result<String> {
        let token = self.session.access_token();
        Ok(require_token(token.as_deref())?.to_string())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentsUpdated> {
        self.events.subscribe()
    }

    /// Report a write: toast either way, pass the result through.
    fn notify<T>(&self, result: Result<T>, success: &str) -> Result<T> {
        match &result {
            Ok(_) => {
                self.notifier.success("Documents", success);
            }
            Err(e) => {
                self.notifier.error("Documents", e.user_message());
            }
        }
        result
    }

    pub async fn list_templates(&self) -> Result<Vec<DocumentTemplate>> {
        let token = self.token()?;
        Ok(self.templates.list::<DocumentTemplate>(&token).await?.results)
    }

    pub async fn template(&self, id: &str) -> Result<DocumentTemplate> {
        let token = self.token()?;
        self.templates.retrieve(&token, id).await
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_template(&self, request: &TemplateRequest) -> Result<DocumentTemplate> {
        let result = async {
            let token = self.token()?;
            let body = serde_json::to_value(request).map_err(anyhow::Error::from)?;
            decode(self.templates.create(&token, Body::Json(body)).await?)
        }
        .await;
        self.notify(result, "Template created successfully")
    }

    #[instrument(skip(self, request))]
    pub async fn update_template(&self, id: &str, request: &TemplateRequest) -> Result<DocumentTemplate> {
        let result = async {
            let token = self.token()?;
            let body = serde_json::to_value(request).map_err(anyhow::Error::from)?;
            decode(self.templates.update(&token, id, Body::Json(body)).await?)
        }
        .await;
        self.notify(result, "Template updated successfully")
    }

    #[instrument(skip(self))]
    pub async fn delete_template(&self, id: &str) -> Result<()> {
        let result = async {
            let token = self.token()?;
            self.templates.delete(&token, id).await
        }
        .await;
        self.notify(result, "Template deleted successfully")
    }

    /// Start a generation. On success the document is hinted in the session
    /// and announced to subscribers.
    #[instrument(skip(self, request), fields(template = %request.template))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedDocument> {
        let result = async {
            let token = self.token()?;
            let body = serde_json::to_value(request).map_err(anyhow::Error::from)?;
            decode::<GeneratedDocument>(self.generations.create(&token, Body::Json(body)).await?)
        }
        .await;
        let document = self.notify(result, "Document generated successfully")?;

        self.remember(&document);
        info!(document = %document.id, "Document generated");
        // No subscribers is fine
        let _ = self.events.send(DocumentsUpdated {
            document_id: document.id.clone(),
        });
        Ok(document)
    }

    /// Final wizard step of a generation.
    #[instrument(skip(self, payload))]
    pub async fn update_step4(&self, id: &str, payload: Value) -> Result<GeneratedDocument> {
        let result = async {
            let token = self.token()?;
            decode(self.generations.action(&token, id, "update_step4", payload).await?)
        }
        .await;
        self.notify(result, "Document updated successfully")
    }

    /// Server list plus any hinted documents it does not include yet. Hints
    /// the server now lists are pruned.
    #[instrument(skip(self))]
    pub async fn generated(&self) -> Result<DocumentListing> {
        let token = self.token()?;
        let documents = self.generations.list::<GeneratedDocument>(&token).await?.results;

        let hints = self.hints();
        let (listed, pending): (Vec<_>, Vec<_>) = hints
            .into_iter()
            .partition(|hint| documents.iter().any(|d| d.id == hint.id));
        if !listed.is_empty() {
            debug!(pruned = listed.len(), "Server caught up with hinted documents");
            self.store_hints(&pending);
        }

        Ok(DocumentListing { documents, pending })
    }

    /// Hinted documents in the session. Anything unreadable is ignored.
    pub fn hints(&self) -> Vec<GeneratedDocument> {
        let Some(raw) = self.session.get(GENERATED_DOCUMENTS) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|entry| serde_json::from_value(entry).ok())
                .collect(),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed generated documents hint");
                Vec::new()
            }
        }
    }

    fn remember(&self, document: &GeneratedDocument) {
        let mut hints = self.hints();
        hints.retain(|h| h.id != document.id);
        hints.insert(0, document.clone());
        hints.truncate(MAX_HINTS);
        self.store_hints(&hints);
    }

    fn store_hints(&self, hints: &[GeneratedDocument]) {
        let stored = serde_json::to_string(hints)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.session.set(GENERATED_DOCUMENTS, raw));
        if let Err(e) = stored {
            warn!(error = %e, "Failed to store generated documents hint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn library(server: &MockServer) -> (DocumentLibrary, Arc<MemorySession>) {
        let session = Arc::new(MemorySession::with_token("tok"));
        let ctx = FormContext::new(session.clone(), Notifier::default());
        let client = ApiClient::new(server.uri().parse().unwrap(), None).unwrap();
        (DocumentLibrary::new(client, &ctx), session)
    }

    fn generated(id: u64) -> Value {
        json!({"id": id, "template": 3, "title": format!("Subscription {id}"), "status": "draft", "step": 1})
    }

    #[tokio::test]
    async fn generation_is_hinted_and_announced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/document-generations/"))
            .and(body_partial_json(json!({"template": "3", "title": "Subscription 81"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(generated(81)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/document-generations/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [], "count": 0})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/document-generations/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [generated(81)], "count": 1})))
            .mount(&server)
            .await;

        let (library, session) = library(&server);
        let mut updates = library.subscribe();

        let request = GenerationRequest::builder().template("3").title("Subscription 81").build();
        let document = library.generate(&request).await.unwrap();
        assert_eq!(document.id, "81");
        assert_eq!(updates.recv().await.unwrap().document_id, "81");
        assert!(session.get(GENERATED_DOCUMENTS).unwrap().contains("Subscription 81"));

        // server has not caught up: the hint is shown as pending
        let listing = library.generated().await.unwrap();
        assert!(listing.documents.is_empty());
        assert_eq!(listing.pending.len(), 1);

        // server lists it: the hint is dropped
        let listing = library.generated().await.unwrap();
        assert_eq!(listing.documents.len(), 1);
        assert!(listing.pending.is_empty());
        assert!(library.hints().is_empty());
    }

    #[tokio::test]
    async fn malformed_hints_are_ignored() {
        let server = MockServer::start().await;
        let (library, session) = library(&server);

        session.set(GENERATED_DOCUMENTS, "not json".to_string()).unwrap();
        assert!(library.hints().is_empty());

        session
            .set(GENERATED_DOCUMENTS, json!([{"title": "no id"}, generated(5)]).to_string())
            .unwrap();
        let hints = library.hints();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].id, "5");
    }

    #[tokio::test]
    async fn update_step4_posts_to_sub_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/document-generations/81/update_step4/"))
            .and(body_json(json!({"signatories": ["gp@example.com"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 81, "status": "ready", "step": 4, "file_url": "https://files/81.pdf"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (library, _) = library(&server);
        let document = library
            .update_step4("81", json!({"signatories": ["gp@example.com"]}))
            .await
            .unwrap();
        assert_eq!(document.step, Some(4));
        assert_eq!(document.file_url.as_deref(), Some("https://files/81.pdf"));
    }

    #[tokio::test]
    async fn template_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/document-templates/"))
            .and(body_json(json!({
                "name": "Side letter",
                "description": "",
                "document_type": "side_letter",
                "required_fields": ["investor_name"],
                "is_active": true
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 3, "name": "Side letter", "document_type": "side_letter",
                "required_fields": ["investor_name"], "created_at": "2026-01-05T10:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/document-templates/3/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "Template is in use"})))
            .mount(&server)
            .await;

        let (library, _) = library(&server);
        let request = TemplateRequest::builder()
            .name("Side letter")
            .document_type("side_letter")
            .required_fields(vec!["investor_name".to_string()])
            .build();
        let template = library.create_template(&request).await.unwrap();
        assert_eq!(template.id, "3");
        assert!(template.is_active);
        assert!(template.created_at.is_some());

        let err = library.delete_template("3").await.unwrap_err();
        assert_eq!(err.user_message(), "Template is in use");
    }
}
