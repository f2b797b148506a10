use super::{QueryParams, RemoteClient, list_items};
use crate::config::EngineConfig;
use crate::core::{Result, SyncError, TransportError, TransportErrorKind};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

/// REST transport over `reqwest` with bearer-token authentication.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl HttpRemote {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SyncError::Config(format!("cannot build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &QueryParams,
        body: Option<&Value>,
    ) -> Result<Value> {
        debug!(%method, path, "remote request");
        let mut request = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&self.auth_token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let payload = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            Ok(payload)
        } else {
            Err(status_error(status, &payload).into())
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    async fn get(&self, path: &str, query: &QueryParams) -> Result<Value> {
        self.send(Method::GET, path, query, None).await
    }

    async fn get_bulk(&self, path: &str, page_size: usize, query: &QueryParams) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let mut paged = query.to_vec();
            paged.push(("$page".to_string(), page.to_string()));
            paged.push(("$pageSize".to_string(), page_size.to_string()));

            let response = self.get(path, &paged).await?;
            let total = response
                .get("count")
                .and_then(Value::as_u64)
                .map(|count| count as usize);
            let batch = list_items(response);
            let batch_len = batch.len();
            items.extend(batch);

            let done = match total {
                Some(total) => items.len() >= total,
                None => batch_len < page_size,
            };
            if done || batch_len == 0 {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::PATCH, path, &[], Some(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::PUT, path, &[], Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::DELETE, path, &[], None).await
    }
}

fn status_error(status: StatusCode, payload: &Value) -> TransportError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportErrorKind::Auth,
        StatusCode::NOT_FOUND => TransportErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportErrorKind::Timeout,
        s if s.is_server_error() => TransportErrorKind::Server,
        _ => TransportErrorKind::Request,
    };

    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| payload.as_str().map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    let details = payload
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .or_else(|| e.as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    TransportError::new(kind, message)
        .with_status(status.as_u16())
        .with_details(details)
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else {
            TransportErrorKind::Request
        };
        let mut error = TransportError::new(kind, err.to_string());
        if let Some(status) = err.status() {
            error = error.with_status(status.as_u16());
        }
        error.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_error_collects_sub_errors() {
        let payload = json!({
            "message": "Validation failed",
            "errors": [{"message": "name is required"}, "key too long"]
        });
        let err = status_error(StatusCode::BAD_REQUEST, &payload);

        assert_eq!(err.kind, TransportErrorKind::Request);
        assert_eq!(err.status, Some(400));
        assert_eq!(err.details, vec!["name is required", "key too long"]);
    }

    #[test]
    fn test_status_error_kinds() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, &Value::Null).kind, TransportErrorKind::Auth);
        assert_eq!(status_error(StatusCode::NOT_FOUND, &Value::Null).kind, TransportErrorKind::NotFound);
        assert_eq!(status_error(StatusCode::BAD_GATEWAY, &Value::Null).kind, TransportErrorKind::Server);
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, &Value::Null).message,
            "Bad Gateway"
        );
    }

    #[tokio::test]
    async fn test_request_errors_become_transport_errors() {
        let err: SyncError = Client::new().get("not a url").send().await.unwrap_err().into();
        assert!(matches!(
            err,
            SyncError::Transport(ref t) if t.kind == TransportErrorKind::Request
        ));
    }

    #[test]
    fn test_url_joining() {
        let config = crate::config::EngineConfig::new("tenant").base_url("https://api.example.com/");
        let remote = HttpRemote::new(&config).unwrap();
        assert_eq!(remote.url("/data/v1/items"), "https://api.example.com/data/v1/items");
    }
}
