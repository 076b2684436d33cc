use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::store::{KvStore, RemoteSnapshot};
use crate::error::StoreError;

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;
const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";

/// Connection settings read from the standard Consul client variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulSettings {
    /// Base URL including scheme, without a trailing slash.
    pub base_url: String,
    pub token: Option<String>,
    pub verify_tls: bool,
}

impl ConsulSettings {
    /// Read `CONSUL_HTTP_ADDR`, `CONSUL_HTTP_TOKEN`, `CONSUL_HTTP_SSL` and
    /// `CONSUL_HTTP_SSL_VERIFY` from the process environment.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ConsulSettings::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let address = lookup("CONSUL_HTTP_ADDR")
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let ssl = lookup("CONSUL_HTTP_SSL").is_some_and(|v| parse_bool(&v));
        let verify_tls = lookup("CONSUL_HTTP_SSL_VERIFY").is_none_or(|v| parse_bool(&v));
        let token = lookup("CONSUL_HTTP_TOKEN").filter(|t| !t.is_empty());

        let address = address.trim().trim_end_matches('/');
        let base_url = if let Some(rest) = address.strip_prefix("unix://") {
            return Err(StoreError::Transport(format!(
                "unix socket addresses are not supported: {}",
                rest
            )));
        } else if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else if ssl {
            format!("https://{}", address)
        } else {
            format!("http://{}", address)
        };

        Ok(Self {
            base_url,
            token,
            verify_tls,
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "on"
    )
}

/// One entry of a recursive `GET /v1/kv/` response.
#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Consul KV HTTP API client.
///
/// Requests rejected with 429 or a 5xx status are retried with exponential
/// backoff.
pub struct ConsulClient {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
    base_delay: Duration,
}

impl ConsulClient {
    pub fn new(settings: ConsulSettings) -> Result<Self, StoreError> {
        let http_client = HttpClient::builder()
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: settings.base_url,
            token: settings.token,
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        })
    }

    /// Client configured from the `CONSUL_HTTP_*` environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::new(ConsulSettings::from_env()?)
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a key, with each segment percent-encoded and `/` kept.
    fn kv_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/v1/kv/{}", self.base_url, encoded.join("/"))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.header("X-Consul-Token", token),
            None => request,
        }
    }

    async fn send_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response, StoreError> {
        let mut delay = self.base_delay;
        let mut attempt = 0;

        loop {
            let response = self
                .authorize(build_request())
                .send()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            let status = response.status();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt >= self.max_retries {
                return Ok(response);
            }

            attempt += 1;
            warn!(
                attempt,
                status = status.as_u16(),
                delay_ms = delay.as_millis() as u64,
                "Consul request rejected, retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    async fn status_error(method: &'static str, key: &str, response: Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StoreError::Status {
            method,
            key: key.to_string(),
            status,
            body: body.trim().to_string(),
        }
    }
}

#[async_trait]
impl KvStore for ConsulClient {
    #[instrument(skip(self), level = "debug")]
    async fn list(&self, prefix: &str) -> Result<RemoteSnapshot, StoreError> {
        let url = self.kv_url(prefix);
        let response = self
            .send_with_retry(|| self.http_client.get(&url).query(&[("recurse", "true")]))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No keys under prefix");
            return Ok(RemoteSnapshot::new());
        }
        if !response.status().is_success() {
            return Err(Self::status_error("GET", prefix, response).await);
        }

        let pairs: Vec<KvPair> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let mut snapshot = RemoteSnapshot::new();
        for pair in pairs {
            let value = match pair.value {
                Some(encoded) => STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| StoreError::Decode(format!("{}: {}", pair.key, e)))?,
                None => Vec::new(),
            };
            snapshot.insert(pair.key, value);
        }
        debug!("Listed {} keys", snapshot.len());
        Ok(snapshot)
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let url = self.kv_url(key);
        let response = self
            .send_with_retry(|| self.http_client.put(&url).body(value.to_vec()))
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error("PUT", key, response).await);
        }

        // Consul answers `true` or `false`; `false` means the write was refused.
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if body.trim() == "false" {
            return Err(StoreError::Status {
                method: "PUT",
                key: key.to_string(),
                status: 200,
                body: body.trim().to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let url = self.kv_url(key);
        let response = self
            .send_with_retry(|| self.http_client.delete(&url))
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::status_error("DELETE", key, response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(vars: &[(&str, &str)]) -> Result<ConsulSettings, StoreError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConsulSettings::from_lookup(|name| vars.get(name).cloned())
    }

    fn client(server: &MockServer, token: Option<&str>) -> ConsulClient {
        ConsulClient::new(ConsulSettings {
            base_url: server.uri(),
            token: token.map(str::to_string),
            verify_tls: true,
        })
        .unwrap()
        .with_retry(2, Duration::from_millis(1))
    }

    #[test]
    fn test_settings_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.base_url, "http://127.0.0.1:8500");
        assert_eq!(s.token, None);
        assert!(s.verify_tls);
    }

    #[test]
    fn test_settings_ssl_and_token() {
        let s = settings(&[
            ("CONSUL_HTTP_ADDR", "consul.internal:8501"),
            ("CONSUL_HTTP_SSL", "true"),
            ("CONSUL_HTTP_SSL_VERIFY", "false"),
            ("CONSUL_HTTP_TOKEN", "secret"),
        ])
        .unwrap();
        assert_eq!(s.base_url, "https://consul.internal:8501");
        assert_eq!(s.token.as_deref(), Some("secret"));
        assert!(!s.verify_tls);
    }

    #[test]
    fn test_settings_explicit_scheme_wins() {
        let s = settings(&[("CONSUL_HTTP_ADDR", "http://10.0.0.1:8500/"), ("CONSUL_HTTP_SSL", "1")]).unwrap();
        assert_eq!(s.base_url, "http://10.0.0.1:8500");
    }

    #[test]
    fn test_settings_rejects_unix_socket() {
        assert!(settings(&[("CONSUL_HTTP_ADDR", "unix:///var/run/consul.sock")]).is_err());
    }

    #[tokio::test]
    async fn test_kv_url_encodes_segments() {
        let server = MockServer::start().await;
        let c = client(&server, None);
        assert_eq!(
            c.kv_url("svc/my key/a"),
            format!("{}/v1/kv/svc/my%20key/a", server.uri())
        );
    }

    #[tokio::test]
    async fn test_list_decodes_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/svc/"))
            .and(query_param("recurse", "true"))
            .and(header("X-Consul-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"Key": "svc/", "Value": null, "Flags": 0},
                {"Key": "svc/a", "Value": "b25l", "Flags": 0}
            ])))
            .mount(&server)
            .await;

        let snapshot = client(&server, Some("tok")).list("svc/").await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("svc/a").map(Vec::as_slice), Some(&b"one"[..]));
        assert_eq!(snapshot.get("svc/").map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_list_not_found_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let snapshot = client(&server, None).list("svc/").await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_put_sends_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/svc/a"))
            .and(body_bytes(b"hello".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, None).put("svc/a", b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_refused_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_string("false"))
            .mount(&server)
            .await;

        let err = client(&server, None).put("svc/a", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::Status { method: "PUT", .. }));
    }

    #[tokio::test]
    async fn test_put_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .mount(&server)
            .await;

        client(&server, None).put("svc/a", b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server, None).put("svc/a", b"x").await.unwrap_err();
        match err {
            StoreError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/kv/svc/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(&server, None).delete("svc/gone").await.unwrap();
    }
}
