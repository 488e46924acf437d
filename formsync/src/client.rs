//! HTTP transport shared by every adapter.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::errors::{Error, Result, ServerErrorBody};
use crate::upload::FileUpload;

/// Request body variants the backend accepts.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(Value),
    Multipart(MultipartBody),
}

/// A multipart body kept in plain data until it is sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub files: Vec<(String, FileUpload)>,
}

impl MultipartBody {
    /// Flatten a JSON payload into text parts. Nulls are skipped, nested
    /// values travel as JSON strings.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let fields = payload
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), text))
            })
            .collect();
        Self {
            fields,
            files: Vec::new(),
        }
    }

    pub fn file(mut self, name: impl Into<String>, file: FileUpload) -> Self {
        self.files.push((name.into(), file));
        self
    }

    fn into_form(self) -> Result<Form> {
        let mut form = Form::new();
        for (key, value) in self.fields {
            form = form.text(key, value);
        }
        for (key, file) in self.files {
            let mime = file.mime_type().to_string();
            let part = Part::bytes(file.content.to_vec())
                .file_name(file.file_name.clone())
                .mime_str(&mime)
                .map_err(|e| anyhow::anyhow!("Invalid MIME type {mime}: {e}"))?;
            form = form.part(key, part);
        }
        Ok(form)
    }
}

/// Makes sure a url has a trailing slash, so `join` appends instead of
/// replacing the last path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// Authenticated JSON/multipart client for the settings backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
}

impl ApiClient {
    /// `request_timeout` of `None` leaves the transport default in place.
    pub fn new(base_url: Url, request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            http,
            base_url: ensure_slash(&base_url),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| anyhow::anyhow!("Failed to construct URL for {path}: {e}").into())
    }

    /// Send one request. Non-2xx responses become [`Error::Http`] with a
    /// message extracted from the body, ranking `error_fields` first. An empty
    /// 2xx body comes back as `Value::Null`.
    #[instrument(skip(self, token, body, error_fields))]
    pub async fn send(&self, method: Method, path: &str, token: &str, body: Body, error_fields: &[&str]) -> Result<Value> {
        let url = self.url(path)?;
        debug!("Sending request to {}", url);

        let mut request = self.http.request(method, url.clone()).bearer_auth(token);
        request = match body {
            Body::Empty => request,
            Body::Json(json) => request.json(&json),
            Body::Multipart(multipart) => request.multipart(multipart.into_form()?),
        };

        let response = request.send().await.map_err(|source| {
            warn!(url = %url, error = %source, "Request did not reach the server");
            Error::Network { source }
        })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = ServerErrorBody::parse(&text, error_fields).message();
            warn!(url = %url, status = status.as_u16(), "Request failed: {}", message);
            return Err(Error::Http {
                status: status.as_u16(),
                body: text,
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!("Failed to parse response as JSON. Error: {}", e);
            tracing::debug!("Response body was: {}", text);
            Error::Decode { message: e.to_string() }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        let base = format!("{}/api", server.uri()).parse().unwrap();
        ApiClient::new(base, None).unwrap()
    }

    #[test]
    fn joins_paths_under_base_prefix() {
        let client = ApiClient::new("https://example.com/api".parse().unwrap(), None).unwrap();
        assert_eq!(
            client.url("/investors/settings/identity/").unwrap().as_str(),
            "https://example.com/api/investors/settings/identity/"
        );
    }

    #[tokio::test]
    async fn sends_bearer_token_and_json() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/syndicate/settings/kyb/"))
            .and(header("authorization", "Bearer t0k"))
            .and(body_json(json!({"company_name": "Acme"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server)
            .send(
                Method::PATCH,
                "syndicate/settings/kyb/",
                "t0k",
                Body::Json(json!({"company_name": "Acme"})),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn error_responses_carry_status_body_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"tax_id": ["Invalid TIN"]})))
            .mount(&server)
            .await;

        let err = client(&server)
            .send(Method::GET, "x/", "t", Body::Empty, &["tax_id"])
            .await
            .unwrap_err();
        match err {
            Error::Http { status, body, message } => {
                assert_eq!(status, 400);
                assert!(body.contains("Invalid TIN"));
                assert_eq!(message, "Invalid TIN");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_content_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let body = client(&server).send(Method::DELETE, "x/1/", "t", Body::Empty, &[]).await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let client = ApiClient::new("http://127.0.0.1:9/".parse().unwrap(), None).unwrap();
        let err = client.send(Method::GET, "x/", "t", Body::Empty, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
        assert_eq!(err.user_message(), "Network error. Please check your connection and try again.");
    }

    #[test]
    fn multipart_flattens_payload() {
        let payload = json!({"title": "Policy", "expires": null, "is_primary": true, "tags": ["a"]});
        let body = MultipartBody::from_payload(payload.as_object().unwrap());
        assert_eq!(
            body.fields,
            vec![
                ("is_primary".to_string(), "true".to_string()),
                ("tags".to_string(), r#"["a"]"#.to_string()),
                ("title".to_string(), "Policy".to_string()),
            ]
        );
    }
}
