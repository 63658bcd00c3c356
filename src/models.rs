use crate::{
    constants::{CLIENT_CERT_HEADER, IDENTITY_ENTITLED, IDENTITY_PING},
    error::DenialReason,
};
use axum::http::HeaderMap;
use serde::Serialize;
use tracing::debug;

/// The slice of an incoming registry request the gate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationRequest<'a> {
    pub method: &'a str,
    /// Raw request URI, path plus any query string.
    pub request_uri: &'a str,
    pub credential: Option<&'a str>,
    /// Repository name when the host already parsed it from the route.
    pub repository: Option<&'a str>,
}

impl<'a> AuthorizationRequest<'a> {
    pub fn new(method: &'a str, request_uri: &'a str) -> Self {
        Self {
            method,
            request_uri,
            credential: None,
            repository: None,
        }
    }

    pub fn from_headers(method: &'a str, request_uri: &'a str, headers: &'a HeaderMap) -> Self {
        Self {
            credential: credential_from_headers(headers),
            ..Self::new(method, request_uri)
        }
    }

    pub fn with_credential(mut self, credential: &'a str) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_repository(mut self, repository: &'a str) -> Self {
        self.repository = Some(repository);
        self
    }

    pub(crate) fn presented_credential(&self) -> Option<&'a str> {
        self.credential.filter(|value| !value.is_empty())
    }
}

/// The certificate header exactly as sent. Values that are not UTF-8 cannot
/// be carried in the JSON payload and are treated as absent.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(CLIENT_CERT_HEADER)?;
    match std::str::from_utf8(value.as_bytes()) {
        Ok(credential) => Some(credential),
        Err(err) => {
            debug!(
                header = CLIENT_CERT_HEADER,
                len = value.len(),
                error = %err,
                "client certificate header present but not valid UTF-8"
            );
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedIdentity {
    pub name: String,
}

impl AuthorizedIdentity {
    /// Stand-in for requests that skipped verification.
    pub fn ping() -> Self {
        Self {
            name: IDENTITY_PING.to_string(),
        }
    }

    pub fn entitled() -> Self {
        Self {
            name: IDENTITY_ENTITLED.to_string(),
        }
    }

    pub fn was_verified(&self) -> bool {
        self.name == IDENTITY_ENTITLED
    }
}

#[derive(Debug)]
pub enum AuthorizationOutcome {
    Authenticated { identity: AuthorizedIdentity },
    Denied { reason: DenialReason },
}

impl AuthorizationOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}
