//! REST client for the record-storage backend.
//!
//! The backend exposes generic per-collection CRUD with relation expansion
//! plus password authentication issuing a bearer token. Every call except
//! authentication itself requires a token; the check happens before any
//! network round-trip.

use crate::records::UserRecord;
use crate::{BackendError, BackendResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Bearer session issued by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    /// Opaque bearer token.
    pub token: String,
    /// Id of the authenticated user record.
    pub record_id: String,
}

/// Response of the password-auth and auth-refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub record: UserRecord,
}

/// Query options for collection list calls.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub page: u32,
    pub per_page: u32,
    pub sort: Option<String>,
    pub filter: Option<String>,
    pub expand: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            sort: None,
            filter: None,
            expand: None,
        }
    }
}

impl ListQuery {
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = Some(expand.into());
        self
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("perPage", self.per_page.to_string()),
        ];
        if let Some(sort) = &self.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(filter) = &self.filter {
            params.push(("filter", filter.clone()));
        }
        if let Some(expand) = &self.expand {
            params.push(("expand", expand.clone()));
        }
        params
    }
}

/// Build a `field = "value"` filter expression, escaping the value.
pub fn filter_eq(field: &str, value: &str) -> String {
    format!(r#"{} = "{}""#, field, escape_filter_value(value))
}

/// Build a `field < "value"` filter expression, escaping the value.
pub fn filter_lt(field: &str, value: &str) -> String {
    format!(r#"{} < "{}""#, field, escape_filter_value(value))
}

/// Join filter expressions with `&&`.
pub fn filter_and(parts: &[String]) -> String {
    parts.join(" && ")
}

fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Client for the record-storage backend.
#[derive(Clone)]
pub struct PocketBaseClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<RwLock<Option<AuthToken>>>,
}

impl PocketBaseClient {
    /// Create a new client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Arc::new(RwLock::new(None)),
        }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The current bearer token, if authenticated.
    pub fn token(&self) -> Option<AuthToken> {
        self.auth.read().expect("auth lock poisoned").clone()
    }

    /// Install a previously persisted token (before `auth-refresh`
    /// validation).
    pub fn set_token(&self, token: AuthToken) {
        *self.auth.write().expect("auth lock poisoned") = Some(token);
    }

    /// Drop the local session token. The backend record is untouched.
    pub fn clear_token(&self) {
        *self.auth.write().expect("auth lock poisoned") = None;
    }

    /// Whether a token is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.auth.read().expect("auth lock poisoned").is_some()
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{}/records", self.base_url, collection)
    }

    /// Resolve a stored file reference into a fetchable URL.
    pub fn file_url(&self, collection: &str, record_id: &str, filename: &str) -> String {
        format!(
            "{}/api/files/{}/{}/{}",
            self.base_url, collection, record_id, filename
        )
    }

    fn require_token(&self) -> BackendResult<String> {
        self.auth
            .read()
            .expect("auth lock poisoned")
            .as_ref()
            .map(|t| t.token.clone())
            .ok_or(BackendError::NotAuthenticated)
    }

    /// Exchange credentials for a bearer session on the `users` collection
    /// and remember the token.
    pub async fn auth_with_password(
        &self,
        identity: &str,
        password: &str,
    ) -> BackendResult<AuthResponse> {
        let url = format!(
            "{}/api/collections/users/auth-with-password",
            self.base_url
        );

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "identity": identity,
                "password": password,
            }))
            .send()
            .await?;

        let auth: AuthResponse = Self::decode(response, "auth-with-password").await?;
        self.set_token(AuthToken {
            token: auth.token.clone(),
            record_id: auth.record.id.clone(),
        });
        Ok(auth)
    }

    /// Re-validate the held token and rotate it.
    pub async fn auth_refresh(&self) -> BackendResult<AuthResponse> {
        let token = self.require_token()?;
        let url = format!("{}/api/collections/users/auth-refresh", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", token)
            .send()
            .await?;

        let auth: AuthResponse = Self::decode(response, "auth-refresh").await?;
        self.set_token(AuthToken {
            token: auth.token.clone(),
            record_id: auth.record.id.clone(),
        });
        Ok(auth)
    }

    /// List records of a collection.
    pub async fn list<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> BackendResult<crate::records::ListResult<T>> {
        let token = self.require_token()?;
        let response = self
            .http
            .get(self.collection_url(collection))
            .header("Authorization", token)
            .query(&query.to_params())
            .send()
            .await?;
        Self::decode(response, "list").await
    }

    /// Fetch a single record by id.
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        expand: Option<&str>,
    ) -> BackendResult<T> {
        let token = self.require_token()?;
        let url = format!("{}/{}", self.collection_url(collection), id);
        let mut request = self.http.get(&url).header("Authorization", token);
        if let Some(expand) = expand {
            request = request.query(&[("expand", expand)]);
        }
        let response = request.send().await?;
        Self::decode(response, "get_one").await
    }

    /// Create a record from a JSON body.
    pub async fn create<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        collection: &str,
        body: &B,
    ) -> BackendResult<T> {
        let token = self.require_token()?;
        let response = self
            .http
            .post(self.collection_url(collection))
            .header("Authorization", token)
            .json(body)
            .send()
            .await?;
        Self::decode(response, "create").await
    }

    /// Create a record without a session. Registration and guest
    /// provisioning use this: the `users` collection accepts anonymous
    /// creates.
    pub async fn create_unauthenticated<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        collection: &str,
        body: &B,
    ) -> BackendResult<T> {
        let response = self
            .http
            .post(self.collection_url(collection))
            .json(body)
            .send()
            .await?;
        Self::decode(response, "create").await
    }

    /// Create a record from a multipart form (field values plus files).
    pub async fn create_multipart<T: DeserializeOwned>(
        &self,
        collection: &str,
        form: reqwest::multipart::Form,
    ) -> BackendResult<T> {
        let response = self
            .http
            .post(self.collection_url(collection))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response, "create").await
    }

    /// Patch a record with a JSON body.
    pub async fn update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        body: &B,
    ) -> BackendResult<T> {
        let token = self.require_token()?;
        let url = format!("{}/{}", self.collection_url(collection), id);
        let response = self
            .http
            .patch(&url)
            .header("Authorization", token)
            .json(body)
            .send()
            .await?;
        Self::decode(response, "update").await
    }

    /// Patch a record with a multipart form (field values plus files).
    pub async fn update_multipart<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        form: reqwest::multipart::Form,
    ) -> BackendResult<T> {
        let token = self.require_token()?;
        let url = format!("{}/{}", self.collection_url(collection), id);
        let response = self
            .http
            .patch(&url)
            .header("Authorization", token)
            .multipart(form)
            .send()
            .await?;
        Self::decode(response, "update").await
    }

    /// Delete a record.
    pub async fn delete(&self, collection: &str, id: &str) -> BackendResult<()> {
        let token = self.require_token()?;
        let url = format!("{}/{}", self.collection_url(collection), id);
        let response = self
            .http
            .delete(&url)
            .header("Authorization", token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response, "delete").await)
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> BackendResult<T> {
        if !response.status().is_success() {
            return Err(Self::status_error(response, operation).await);
        }
        Ok(response.json::<T>().await?)
    }

    async fn status_error(response: reqwest::Response, operation: &str) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let body_summary = summarize_response_body(&body);
        tracing::error!(
            status = %status,
            operation,
            body_summary = %body_summary,
            "backend request failed"
        );

        // The backend wraps failures in {"code", "message", "data"}.
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());

        BackendError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::CardRecord;

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        let client = PocketBaseClient::new("http://127.0.0.1:8090/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8090");
        assert!(!client.is_authenticated());
    }

    #[test]
    fn test_collection_url() {
        let client = PocketBaseClient::new("http://127.0.0.1:8090");
        assert_eq!(
            client.collection_url("cards"),
            "http://127.0.0.1:8090/api/collections/cards/records"
        );
    }

    #[test]
    fn test_file_url() {
        let client = PocketBaseClient::new("http://127.0.0.1:8090");
        assert_eq!(
            client.file_url("users", "u1", "pic.png"),
            "http://127.0.0.1:8090/api/files/users/u1/pic.png"
        );
    }

    #[test]
    fn test_token_lifecycle() {
        let client = PocketBaseClient::new("http://127.0.0.1:8090");
        client.set_token(AuthToken {
            token: "tok".into(),
            record_id: "u1".into(),
        });
        assert!(client.is_authenticated());
        assert_eq!(client.token().unwrap().record_id, "u1");

        client.clear_token();
        assert!(!client.is_authenticated());
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_list_requires_token_before_any_network_call() {
        // Unroutable base URL: the call must fail on the local token check,
        // not on the network.
        let client = PocketBaseClient::new("http://192.0.2.1:9");
        let result = client
            .list::<CardRecord>("cards", &ListQuery::default())
            .await;
        assert!(matches!(result, Err(BackendError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_delete_requires_token() {
        let client = PocketBaseClient::new("http://192.0.2.1:9");
        let result = client.delete("messages", "m1").await;
        assert!(matches!(result, Err(BackendError::NotAuthenticated)));
    }

    #[test]
    fn test_filter_eq_quotes_value() {
        assert_eq!(filter_eq("card", "c123"), r#"card = "c123""#);
    }

    #[test]
    fn test_filter_eq_escapes_quotes() {
        assert_eq!(
            filter_eq("name", r#"a"b"#),
            r#"name = "a\"b""#
        );
    }

    #[test]
    fn test_filter_and_joins() {
        let filter = filter_and(&[
            filter_eq("role", "guest"),
            filter_lt("expiresAt", "2024-01-01 00:00:00.000Z"),
        ]);
        assert_eq!(
            filter,
            r#"role = "guest" && expiresAt < "2024-01-01 00:00:00.000Z""#
        );
    }

    #[test]
    fn test_list_query_params() {
        let query = ListQuery::default()
            .per_page(100)
            .sort("created")
            .filter(filter_eq("card", "c1"))
            .expand("author");
        let params = query.to_params();

        assert!(params.contains(&("page", "1".to_string())));
        assert!(params.contains(&("perPage", "100".to_string())));
        assert!(params.contains(&("sort", "created".to_string())));
        assert!(params.contains(&("expand", "author".to_string())));
        assert!(params.contains(&("filter", r#"card = "c1""#.to_string())));
    }
}
