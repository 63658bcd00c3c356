use crate::constants::{AUTH_FAILURE_MESSAGE, CHALLENGE_SCHEME, HEADER_JSON};
use axum::{
    Json,
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("\"{key}\" must be set for {controller} access controller")]
    MissingOption { controller: String, key: String },
    #[error("\"{key}\" for {controller} access controller must be {expected}")]
    InvalidOption {
        controller: String,
        key: String,
        expected: &'static str,
    },
    #[error("unknown access controller: {0}")]
    UnknownController(String),
    #[error("failed to build verification client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Failure of a single call to the verification service.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("verification service unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("verification service returned status {status}")]
    Protocol { status: StatusCode, body: String },
    #[error("verification service response exceeded {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("verification service returned an undecodable body: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Why a request was refused. Kept for diagnostics, never sent to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DenialReason {
    #[error("no client certificate presented")]
    MissingCredential,
    #[error("no repository path could be resolved from the request")]
    NoResourcePath,
    #[error("entitlement verification failed: {0}")]
    VerificationFailed(#[from] VerificationError),
    #[error("entitlement service did not verify the certificate")]
    NotVerified,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::NoResourcePath => "no_resource_path",
            Self::VerificationFailed(_) => "verification_failed",
            Self::NotVerified => "not_verified",
        }
    }
}

/// Deferred "authentication failed" signal, rendered by the host as a 401.
#[derive(Debug, thiserror::Error)]
#[error("{}", AUTH_FAILURE_MESSAGE)]
pub struct Challenge {
    realm: String,
    #[source]
    reason: DenialReason,
}

impl Challenge {
    pub fn new(realm: impl Into<String>, reason: DenialReason) -> Self {
        Self {
            realm: realm.into(),
            reason,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn reason(&self) -> &DenialReason {
        &self.reason
    }

    pub fn www_authenticate(&self) -> String {
        www_authenticate(&self.realm)
    }
}

pub(crate) fn www_authenticate(realm: &str) -> String {
    format!("{CHALLENGE_SCHEME} realm=\"{}\"", realm.replace('"', "\\\""))
}

/// Header value for a realm; `None` when the realm cannot be sent in a header.
pub(crate) fn www_authenticate_value(realm: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&www_authenticate(realm)).ok()
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for Challenge {
    fn into_response(self) -> Response {
        let body = serde_json::to_vec(&ErrorBody {
            error: AUTH_FAILURE_MESSAGE,
        })
        .unwrap_or_else(|_| b"{\"error\":\"Authentication Failure\"}".to_vec());
        let mut builder = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::CONTENT_TYPE, HEADER_JSON);
        if let Some(value) = www_authenticate_value(&self.realm) {
            builder = builder.header(header::WWW_AUTHENTICATE, value);
        }
        builder.body(Body::from(body)).unwrap_or_else(|_| {
            let fallback = Json(ErrorBody {
                error: AUTH_FAILURE_MESSAGE,
            });
            (StatusCode::UNAUTHORIZED, fallback).into_response()
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
