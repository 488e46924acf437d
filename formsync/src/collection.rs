//! Collection endpoints: list, item CRUD and per-item sub-actions.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::client::{ApiClient, Body};
use crate::errors::{Error, Result};

/// One page of a collection listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    /// Total across all pages; equals `results.len()` for unpaginated lists
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Paged {
        #[serde(alias = "data")]
        results: Vec<T>,
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        previous: Option<String>,
    },
    Bare(Vec<T>),
}

impl<T> From<ListBody<T>> for Page<T> {
    fn from(body: ListBody<T>) -> Self {
        match body {
            ListBody::Paged {
                results,
                count,
                next,
                previous,
            } => Page {
                count: count.unwrap_or(results.len() as u64),
                results,
                next,
                previous,
            },
            ListBody::Bare(results) => Page {
                count: results.len() as u64,
                results,
                next: None,
                previous: None,
            },
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::Decode { message: e.to_string() })
}

/// Client for one collection endpoint (`PATH` with a trailing slash).
#[derive(Debug, Clone)]
pub struct CollectionClient {
    client: ApiClient,
    path: &'static str,
    error_fields: &'static [&'static str],
}

impl CollectionClient {
    pub fn new(client: ApiClient, path: &'static str) -> Self {
        Self {
            client,
            path,
            error_fields: &[],
        }
    }

    /// Field names to rank first when extracting server error messages
    pub fn with_error_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.error_fields = fields;
        self
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    fn item_path(&self, id: &str) -> String {
        format!("{}{}/", self.path, id)
    }

    #[instrument(skip(self, token), fields(path = self.path))]
    pub async fn list<T: DeserializeOwned>(&self, token: &str) -> Result<Page<T>> {
        let body = self
            .client
            .send(Method::GET, self.path, token, Body::Empty, self.error_fields)
            .await?;
        let page: Page<T> = decode::<ListBody<T>>(body)?.into();
        debug!(count = page.count, "Listed collection");
        Ok(page)
    }

    /// Every page, following `next` links until the server stops sending one.
    #[instrument(skip(self, token), fields(path = self.path))]
    pub async fn list_all<T: DeserializeOwned>(&self, token: &str) -> Result<Vec<T>> {
        let mut page: Page<T> = self.list(token).await?;
        let mut results = std::mem::take(&mut page.results);
        let mut seen = Vec::new();

        while let Some(next) = page.next.take() {
            if seen.contains(&next) {
                warn!(next = %next, "Pagination loops back on itself; stopping");
                break;
            }
            let body = self
                .client
                .send(Method::GET, &next, token, Body::Empty, self.error_fields)
                .await?;
            page = decode::<ListBody<T>>(body)?.into();
            results.append(&mut page.results);
            seen.push(next);
        }

        debug!(count = results.len(), pages = seen.len() + 1, "Listed every page");
        Ok(results)
    }

    #[instrument(skip(self, token), fields(path = self.path))]
    pub async fn retrieve<T: DeserializeOwned>(&self, token: &str, id: &str) -> Result<T> {
        let body = self
            .client
            .send(Method::GET, &self.item_path(id), token, Body::Empty, self.error_fields)
            .await?;
        decode(body)
    }

    #[instrument(skip(self, token, body), fields(path = self.path))]
    pub async fn create(&self, token: &str, body: Body) -> Result<Value> {
        self.client
            .send(Method::POST, self.path, token, body, self.error_fields)
            .await
    }

    #[instrument(skip(self, token, body), fields(path = self.path))]
    pub async fn update(&self, token: &str, id: &str, body: Body) -> Result<Value> {
        self.client
            .send(Method::PATCH, &self.item_path(id), token, body, self.error_fields)
            .await
    }

    #[instrument(skip(self, token), fields(path = self.path))]
    pub async fn delete(&self, token: &str, id: &str) -> Result<()> {
        self.client
            .send(Method::DELETE, &self.item_path(id), token, Body::Empty, self.error_fields)
            .await?;
        Ok(())
    }

    /// `POST <path><id>/<action>/`
    #[instrument(skip(self, token, body), fields(path = self.path))]
    pub async fn action(&self, token: &str, id: &str, action: &str, body: Value) -> Result<Value> {
        let path = format!("{}{}/", self.item_path(id), action);
        self.client
            .send(Method::POST, &path, token, Body::Json(body), self.error_fields)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        id: u64,
        bank_name: String,
    }

    fn accounts(server: &MockServer) -> CollectionClient {
        let client = ApiClient::new(server.uri().parse().unwrap(), None).unwrap();
        CollectionClient::new(client, "syndicate/settings/bank-accounts/")
    }

    #[tokio::test]
    async fn list_all_follows_next_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/bank-accounts/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 2, "bank_name": "Barclays"}],
                "count": 2,
                "next": null
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/bank-accounts/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 1, "bank_name": "Chase"}],
                "count": 2,
                "next": format!("{}/syndicate/settings/bank-accounts/?page=2", server.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;

        let all: Vec<Account> = accounts(&server).list_all("tok").await.unwrap();
        assert_eq!(
            all,
            vec![
                Account { id: 1, bank_name: "Chase".into() },
                Account { id: 2, bank_name: "Barclays".into() },
            ]
        );
    }

    #[tokio::test]
    async fn lists_paginated_and_bare_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/bank-accounts/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 1, "bank_name": "Chase"}],
                "count": 3,
                "next": "https://api/bank-accounts/?page=2",
                "previous": null
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/bank-accounts/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "bank_name": "Chase"},
                {"id": 2, "bank_name": "HSBC"}
            ])))
            .mount(&server)
            .await;

        let accounts = accounts(&server);
        let page: Page<Account> = accounts.list("t").await.unwrap();
        assert_eq!(page.count, 3);
        assert!(page.has_more());

        let page: Page<Account> = accounts.list("t").await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.results[1].bank_name, "HSBC");
        assert!(!page.has_more());
    }

    #[tokio::test]
    async fn item_routes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/syndicate/settings/bank-accounts/7/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "bank_name": "Chase"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/syndicate/settings/bank-accounts/7/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/syndicate/settings/bank-accounts/7/set_primary/"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_primary": true})))
            .expect(1)
            .mount(&server)
            .await;

        let accounts = accounts(&server);
        let account: Account = accounts.retrieve("t", "7").await.unwrap();
        assert_eq!(account.id, 7);
        accounts.delete("t", "7").await.unwrap();
        let body = accounts.action("t", "7", "set_primary", json!({})).await.unwrap();
        assert_eq!(body["is_primary"], json!(true));
    }

    #[tokio::test]
    async fn undecodable_list_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
            .mount(&server)
            .await;

        let err = accounts(&server).list::<Account>("t").await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
