use crate::{
    constants::{ERROR_BODY_SNIPPET_LEN, HEADER_JSON, MAX_RESPONSE_BODY_BYTES, VERIFY_ENDPOINT},
    error::{ConfigError, VerificationError},
};
use async_trait::async_trait;
use axum::http::header;
use reqwest::{Client, Response, redirect::Policy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Payload for `POST {service}/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRequest<'a> {
    data: VerificationData<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct VerificationData<'a> {
    pem_data: &'a str,
    path: &'a str,
}

impl<'a> VerificationRequest<'a> {
    pub fn new(credential: &'a str, path: &'a str) -> Self {
        Self {
            data: VerificationData {
                pem_data: credential,
                path,
            },
        }
    }

    pub fn credential(&self) -> &str {
        self.data.pem_data
    }

    pub fn path(&self) -> &str {
        self.data.path
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerificationResult {
    #[serde(default)]
    pub verified: Option<String>,
}

impl VerificationResult {
    /// Only the literal string `"true"` counts; a missing field is not verified.
    pub fn is_verified(&self) -> bool {
        self.verified.as_deref() == Some("true")
    }
}

#[async_trait]
pub trait EntitlementVerifier: Send + Sync {
    async fn check_entitlement(
        &self,
        credential: &str,
        path: &str,
    ) -> Result<VerificationResult, VerificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementClientConfig {
    pub service_path: String,
    pub timeout_ms: Option<u64>,
    pub insecure_skip_verify: bool,
}

impl EntitlementClientConfig {
    pub fn new(service_path: impl Into<String>) -> Self {
        Self {
            service_path: service_path.into(),
            timeout_ms: None,
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpEntitlementClient {
    service_path: String,
    client: Client,
}

impl HttpEntitlementClient {
    pub fn new(cfg: &EntitlementClientConfig) -> Result<Self, ConfigError> {
        let service_path = cfg.service_path.trim().trim_end_matches('/').to_string();
        if service_path.is_empty() {
            return Err(ConfigError::Invalid(
                "entitlement servicePath must not be empty".to_string(),
            ));
        }

        let mut builder = Client::builder()
            .pool_idle_timeout(Duration::from_secs(15))
            .tcp_keepalive(Duration::from_secs(30))
            .redirect(Policy::limited(3))
            .danger_accept_invalid_certs(cfg.insecure_skip_verify);
        if let Some(timeout_ms) = cfg.timeout_ms {
            let timeout = Duration::from_millis(timeout_ms.max(1));
            builder = builder
                .connect_timeout(timeout.min(Duration::from_secs(3)))
                .timeout(timeout);
        }
        let client = builder.build().map_err(ConfigError::Client)?;

        debug!(
            service_path = service_path.as_str(),
            timeout_ms = cfg.timeout_ms,
            insecure_skip_verify = cfg.insecure_skip_verify,
            "initialized entitlement client"
        );
        Ok(Self {
            service_path,
            client,
        })
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    #[instrument(skip(self, credential))]
    pub async fn check_entitlement(
        &self,
        credential: &str,
        path: &str,
    ) -> Result<VerificationResult, VerificationError> {
        let payload = VerificationRequest::new(credential, path);
        let url = format!("{}{}", self.service_path, VERIFY_ENDPOINT);
        debug!(endpoint = VERIFY_ENDPOINT, path, "calling entitlement service");

        let mut response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, HEADER_JSON)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                error!(error = ?err, "entitlement service call failed");
                VerificationError::Transport(err)
            })?;

        let status = response.status();
        let (body, truncated) =
            read_body_with_limit(&mut response, MAX_RESPONSE_BODY_BYTES).await?;

        if !status.is_success() {
            let snippet = body_snippet(&body);
            error!(
                status = status.as_u16(),
                body = snippet.as_str(),
                "entitlement service returned non-success"
            );
            return Err(VerificationError::Protocol {
                status,
                body: snippet,
            });
        }

        if truncated {
            error!(
                limit = MAX_RESPONSE_BODY_BYTES,
                "entitlement service response body too large"
            );
            return Err(VerificationError::BodyTooLarge {
                limit: MAX_RESPONSE_BODY_BYTES,
            });
        }

        let result = serde_json::from_slice::<VerificationResult>(&body).map_err(|err| {
            error!(
                error = ?err,
                body = body_snippet(&body).as_str(),
                "entitlement service returned invalid JSON payload"
            );
            VerificationError::Decode(err)
        })?;
        debug!(verified = result.verified.as_deref(), "entitlement service responded");
        Ok(result)
    }
}

#[async_trait]
impl EntitlementVerifier for HttpEntitlementClient {
    async fn check_entitlement(
        &self,
        credential: &str,
        path: &str,
    ) -> Result<VerificationResult, VerificationError> {
        HttpEntitlementClient::check_entitlement(self, credential, path).await
    }
}

/// Reads at most `limit` bytes of the body. The flag reports whether more
/// was available; reading stops there.
async fn read_body_with_limit(
    response: &mut Response,
    limit: usize,
) -> Result<(Vec<u8>, bool), VerificationError> {
    let limit_u64 = u64::try_from(limit).unwrap_or(u64::MAX);
    if let Some(length) = response.content_length()
        && length > limit_u64
        && response.status().is_success()
    {
        return Ok((Vec::new(), true));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(VerificationError::Transport)?
    {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn body_snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_SNIPPET_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        EntitlementClientConfig, HttpEntitlementClient, VerificationRequest, VerificationResult,
        body_snippet,
    };
    use serde_json::json;

    #[test]
    fn request_serializes_into_data_envelope() {
        let payload = VerificationRequest::new("PEM", "/content/foo/");
        assert_eq!(
            serde_json::to_value(&payload).expect("serialize"),
            json!({"data": {"pem_data": "PEM", "path": "/content/foo/"}})
        );
    }

    #[test]
    fn only_literal_true_is_verified() {
        let parse = |raw: &str| serde_json::from_str::<VerificationResult>(raw).expect("decode");
        assert!(parse(r#"{"verified":"true"}"#).is_verified());
        assert!(!parse(r#"{"verified":"false"}"#).is_verified());
        assert!(!parse(r#"{"verified":"TRUE"}"#).is_verified());
        assert!(!parse(r#"{"verified":null}"#).is_verified());
        assert!(!parse(r#"{}"#).is_verified());
        assert!(parse(r#"{"verified":"true","expires":"never"}"#).is_verified());
    }

    #[test]
    fn boolean_verified_flag_fails_to_decode() {
        assert!(serde_json::from_str::<VerificationResult>(r#"{"verified":true}"#).is_err());
    }

    #[test]
    fn rejects_empty_service_path() {
        let err = HttpEntitlementClient::new(&EntitlementClientConfig::new("  "))
            .expect_err("empty service path");
        assert!(err.to_string().contains("servicePath"));
    }

    #[test]
    fn trims_trailing_slash_from_service_path() {
        let client = HttpEntitlementClient::new(&EntitlementClientConfig::new(
            "http://entitlements.local/",
        ))
        .expect("client");
        assert_eq!(client.service_path(), "http://entitlements.local");
    }

    #[test]
    fn body_snippet_is_bounded() {
        let long = "x".repeat(1_000);
        assert_eq!(body_snippet(long.as_bytes()).len(), 256);
    }
}
