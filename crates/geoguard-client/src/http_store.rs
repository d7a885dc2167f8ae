//! [`DocumentStore`] over the GeoGuard document store HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use geoguard_shared::constants::{EMAIL_HEADER, USER_ID_HEADER};
use geoguard_shared::{Document, RemoteError};

use crate::writer::DocumentStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct KeyedDocument {
    key: String,
    document: Document,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    user_id: String,
    email: String,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            email: email.into(),
        })
    }

    fn docs_url(&self, collection: &str) -> String {
        format!("{}/v1/collections/{}/docs", self.base_url, collection)
    }

    fn doc_url(&self, collection: &str, key: &str) -> String {
        format!("{}/{}", self.docs_url(collection), key)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(USER_ID_HEADER, &self.user_id)
            .header(EMAIL_HEADER, &self.email)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(resp)
    }

    /// Reachability check against `/health`; any 5xx or transport failure
    /// counts as unreachable.
    pub async fn health(&self) -> Result<(), RemoteError> {
        let resp = self
            .send(self.client.get(format!("{}/health", self.base_url)))
            .await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(())
    }
}

async fn into_error(resp: Response) -> RemoteError {
    let status = resp.status();
    let message = resp
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::AuthExpired,
        StatusCode::FORBIDDEN => RemoteError::Forbidden(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Quota,
        s if s.is_server_error() && s != StatusCode::INTERNAL_SERVER_ERROR => {
            // 502/503/504 come from the network path, not from the store.
            RemoteError::Network(message)
        }
        s => RemoteError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
    ) -> Result<(), RemoteError> {
        let resp = self
            .send(self.client.put(self.doc_url(collection, key)).json(&patch))
            .await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(())
    }

    async fn get_one(&self, collection: &str, key: &str) -> Result<Option<Document>, RemoteError> {
        let resp = self
            .send(self.client.get(self.doc_url(collection, key)))
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => resp
                .json::<Document>()
                .await
                .map(Some)
                .map_err(|e| RemoteError::InvalidDocument(e.to_string())),
            _ => Err(into_error(resp).await),
        }
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, Document)>, RemoteError> {
        let resp = self.send(self.client.get(self.docs_url(collection))).await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        let docs: Vec<KeyedDocument> = resp
            .json()
            .await
            .map_err(|e| RemoteError::InvalidDocument(e.to_string()))?;
        Ok(docs.into_iter().map(|d| (d.key, d.document)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let store = HttpDocumentStore::new("http://localhost:8080/", "u1", "a@b.c").unwrap();
        assert_eq!(
            store.doc_url("locations", "u1"),
            "http://localhost:8080/v1/collections/locations/docs/u1"
        );
        assert_eq!(
            store.docs_url("locations"),
            "http://localhost:8080/v1/collections/locations/docs"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = HttpDocumentStore::new(format!("http://{addr}"), "u1", "a@b.c").unwrap();
        let err = store
            .upsert("locations", "u1", Document::new())
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = HttpDocumentStore::new(format!("http://{addr}"), "u1", "a@b.c").unwrap();
        assert!(store.health().await.unwrap_err().is_network());
    }
}
