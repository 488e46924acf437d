//! Remote resource adapters.
//!
//! A [`Resource`] is a static description of one backend record: where it
//! lives, how its response is wrapped, which fields it has and how it is
//! written back. [`ResourceAdapter`] turns that description into `fetch` and
//! `save` calls. The driver only sees the object-safe [`Adapter`] trait, so
//! tests can swap in a scripted adapter.

use std::marker::PhantomData;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::client::{ApiClient, Body, MultipartBody};
use crate::errors::{Error, Result};
use crate::form::{FormState, NormalizedForm};
use crate::schema::{self, FieldSpec};
use crate::upload::UploadPolicy;

/// How a resource is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Idempotent full replace
    Replace,
    /// Partial update
    Update,
    /// Collection create
    Create,
}

impl WriteMode {
    pub fn method(self) -> Method {
        match self {
            WriteMode::Replace => Method::PUT,
            WriteMode::Update => Method::PATCH,
            WriteMode::Create => Method::POST,
        }
    }
}

/// Static description of a backend resource.
pub trait Resource: Send + Sync + 'static {
    /// Human readable name used in logs and toasts
    const NAME: &'static str;
    /// Endpoint relative to the API base, with a trailing slash
    const PATH: &'static str;
    /// Keys the record may be wrapped under (`{ "security": {...} }`)
    const ENVELOPE: &'static [&'static str];
    const FIELDS: &'static [FieldSpec];
    const WRITE: WriteMode;
    /// Collection resources address items as `PATH/<id>/`
    const COLLECTION: bool = false;
    /// A 404 on fetch means "not created yet" rather than a failure
    const OPTIONAL: bool = false;
    const UPLOAD: Option<UploadPolicy> = None;
}

/// Server acknowledgement of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub body: Value,
}

impl Ack {
    /// Identifier of the written record, if the server echoed one
    pub fn id(&self) -> Option<String> {
        match self.body.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// What the reconciliation driver needs from a resource.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn fields(&self) -> &'static [FieldSpec];

    /// Whether a 404 on fetch means an empty, not-yet-created record
    fn optional(&self) -> bool {
        false
    }

    async fn fetch(&self, token: Option<&str>) -> Result<NormalizedForm>;
    async fn save(&self, token: Option<&str>, form: &FormState) -> Result<Ack>;
}

/// Descend through envelope keys (and the generic `data` key) until the
/// record itself is reached. Handles `{data: {...}}`, `{security: {...}}`,
/// `{data: {security: {...}}}` and flat objects.
pub fn unwrap_envelope(body: Value, keys: &[&str]) -> Map<String, Value> {
    let mut current = match body {
        Value::Object(map) => map,
        _ => return Map::new(),
    };

    for _ in 0..2 {
        let next = keys
            .iter()
            .copied()
            .chain(std::iter::once("data"))
            .find(|key| current.get(*key).is_some_and(Value::is_object));
        match next.and_then(|key| current.remove(key)) {
            Some(Value::Object(inner)) => current = inner,
            _ => break,
        }
    }
    current
}

pub(crate) fn require_token(token: Option<&str>) -> Result<&str> {
    token.filter(|t| !t.trim().is_empty()).ok_or(Error::Unauthenticated)
}

/// The one generic adapter every resource is served by.
pub struct ResourceAdapter<R: Resource> {
    client: ApiClient,
    id: Option<String>,
    _resource: PhantomData<R>,
}

impl<R: Resource> Clone for ResourceAdapter<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            id: self.id.clone(),
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> ResourceAdapter<R> {
    /// Singleton resource, or a new (unsaved) collection item
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            id: None,
            _resource: PhantomData,
        }
    }

    /// Existing collection item
    pub fn for_item(client: ApiClient, id: impl Into<String>) -> Self {
        Self {
            client,
            id: Some(id.into()),
            _resource: PhantomData,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn path(&self) -> String {
        match &self.id {
            Some(id) if R::COLLECTION => format!("{}{}/", R::PATH, id),
            _ => R::PATH.to_string(),
        }
    }

    fn write_mode(&self) -> WriteMode {
        match (R::COLLECTION, &self.id) {
            (true, Some(_)) => WriteMode::Update,
            (true, None) => WriteMode::Create,
            (false, _) => R::WRITE,
        }
    }

    /// Serialize the form into the request body, validating any attached file
    /// first so a bad file never reaches the network.
    pub fn payload(&self, form: &FormState) -> Result<Body> {
        let payload = form.to_wire();
        let Some(policy) = R::UPLOAD else {
            return Ok(Body::Json(Value::Object(payload)));
        };

        match form.file(policy.field) {
            Some(file) => {
                policy.validate(file)?;
                Ok(Body::Multipart(
                    MultipartBody::from_payload(&payload).file(policy.field, file.clone()),
                ))
            }
            None if policy.required && self.write_mode() == WriteMode::Create => {
                Err(Error::validation("Please select a file to upload"))
            }
            None => Ok(Body::Multipart(MultipartBody::from_payload(&payload))),
        }
    }
}

#[async_trait]
impl<R: Resource> Adapter for ResourceAdapter<R> {
    fn name(&self) -> &str {
        R::NAME
    }

    fn fields(&self) -> &'static [FieldSpec] {
        R::FIELDS
    }

    fn optional(&self) -> bool {
        R::OPTIONAL
    }

    #[instrument(skip(self, token), fields(resource = R::NAME, id = ?self.id))]
    async fn fetch(&self, token: Option<&str>) -> Result<NormalizedForm> {
        if R::COLLECTION && self.id.is_none() {
            debug!("New collection item, starting from defaults");
            return Ok(NormalizedForm::defaults(R::FIELDS));
        }

        let token = require_token(token)?;
        let body = self
            .client
            .send(Method::GET, &self.path(), token, Body::Empty, &schema::wire_names(R::FIELDS))
            .await?;
        let record = unwrap_envelope(body, R::ENVELOPE);
        Ok(NormalizedForm::from_wire(R::FIELDS, &record))
    }

    #[instrument(skip(self, token, form), fields(resource = R::NAME, id = ?self.id))]
    async fn save(&self, token: Option<&str>, form: &FormState) -> Result<Ack> {
        let token = require_token(token)?;
        let body = self.payload(form)?;
        let mode = self.write_mode();
        debug!(?mode, "Saving");
        let response = self
            .client
            .send(mode.method(), &self.path(), token, body, &schema::wire_names(R::FIELDS))
            .await?;
        Ok(Ack { body: response })
    }
}
