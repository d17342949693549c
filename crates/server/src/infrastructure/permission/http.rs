use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use vis_core::AccessLevel;
use vis_ports::{PermissionGrant, PermissionResolver, ResolveError};

#[derive(Serialize)]
struct ResolveRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    permissions: BTreeMap<String, AccessLevel>,
    #[serde(default)]
    ttl: u64,
}

/// Remote permission service.
///
/// `POST {url}` with `{"token": ...}`; a 200 carries
/// `{"permissions": {pattern: level}, "ttl": secs}`, a 401 or 403 rejects the
/// token. Anything else counts as the service being unavailable.
#[derive(Clone)]
pub struct HttpPermissionResolver {
    client: Client,
    url: String,
}

impl HttpPermissionResolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;
        Ok(HttpPermissionResolver {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PermissionResolver for HttpPermissionResolver {
    async fn resolve(&self, token: &str) -> Result<PermissionGrant, ResolveError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ResolveRequest { token })
            .send()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ResolveError::Denied(format!(
                    "permission service answered {}",
                    resp.status()
                )));
            }
            status if !status.is_success() => {
                return Err(ResolveError::Unavailable(format!(
                    "permission service answered {}",
                    status
                )));
            }
            _ => {}
        }

        let body: ResolveResponse = resp
            .json()
            .await
            .map_err(|e| ResolveError::Unavailable(format!("bad response: {}", e)))?;

        Ok(PermissionGrant {
            permissions: body.permissions,
            ttl_secs: body.ttl,
        })
    }

    fn name(&self) -> &str {
        "HttpPermissionResolver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    async fn start_service() -> String {
        let app = Router::new().route(
            "/resolve",
            post(|Json(body): Json<Value>| async move {
                match body["token"].as_str() {
                    Some("driver") => (
                        AxumStatus::OK,
                        Json(json!({"permissions": {"Signal.Body.*": "rw"}, "ttl": 120})),
                    ),
                    Some("broken") => (AxumStatus::INTERNAL_SERVER_ERROR, Json(json!({}))),
                    _ => (AxumStatus::UNAUTHORIZED, Json(json!({"error": "unknown token"}))),
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/resolve", addr)
    }

    #[tokio::test]
    async fn test_resolves_grant() {
        let resolver = HttpPermissionResolver::new(start_service().await, Duration::from_secs(2)).unwrap();
        let grant = resolver.resolve("driver").await.unwrap();
        assert_eq!(grant.ttl_secs, 120);
        assert_eq!(grant.permissions["Signal.Body.*"], AccessLevel::ReadWrite);
    }

    #[tokio::test]
    async fn test_rejected_and_failing_service() {
        let resolver = HttpPermissionResolver::new(start_service().await, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            resolver.resolve("thief").await,
            Err(ResolveError::Denied(_))
        ));
        assert!(matches!(
            resolver.resolve("broken").await,
            Err(ResolveError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let resolver =
            HttpPermissionResolver::new("http://127.0.0.1:9/resolve", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            resolver.resolve("driver").await,
            Err(ResolveError::Unavailable(_))
        ));
    }
}
