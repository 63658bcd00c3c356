use crate::{
    bypass::{is_ping, should_bypass},
    constants::ENTITLEMENT_CONTROLLER,
    entitlement::{EntitlementClientConfig, EntitlementVerifier, HttpEntitlementClient},
    error::{Challenge, ConfigError, DenialReason, www_authenticate_value},
    models::{AuthorizationOutcome, AuthorizationRequest, AuthorizedIdentity},
    registry::{ControllerOptions, OptionReader},
    resolver::{self, entitlement_path},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, instrument};

#[async_trait]
pub trait AccessController: Send + Sync {
    async fn authorized(
        &self,
        request: &AuthorizationRequest<'_>,
    ) -> Result<AuthorizedIdentity, Challenge>;
}

/// Grants registry access to callers whose client certificate the remote
/// entitlement service verifies for the requested library.
#[derive(Clone)]
pub struct EntitlementAccessController {
    realm: String,
    verifier: Arc<dyn EntitlementVerifier>,
}

impl std::fmt::Debug for EntitlementAccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementAccessController")
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl EntitlementAccessController {
    pub fn new(realm: impl Into<String>, verifier: Arc<dyn EntitlementVerifier>) -> Self {
        Self {
            realm: realm.into(),
            verifier,
        }
    }

    /// Builds the controller from `realm`, `servicePath` and the optional
    /// `timeoutMs` / `insecureSkipVerify` options.
    pub fn from_options(options: &ControllerOptions) -> Result<Self, ConfigError> {
        let reader = OptionReader::new(ENTITLEMENT_CONTROLLER, options);
        let realm = reader.required_string("realm")?;
        if www_authenticate_value(&realm).is_none() {
            return Err(ConfigError::InvalidOption {
                controller: ENTITLEMENT_CONTROLLER.to_string(),
                key: "realm".to_string(),
                expected: "printable text usable in a WWW-Authenticate header",
            });
        }
        let service_path = reader.required_string("servicePath")?;
        let client_cfg = EntitlementClientConfig {
            service_path,
            timeout_ms: reader.optional_u64("timeoutMs")?,
            insecure_skip_verify: reader.optional_bool("insecureSkipVerify")?.unwrap_or(false),
        };
        let client = HttpEntitlementClient::new(&client_cfg)?;
        Ok(Self::new(realm, Arc::new(client)))
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    #[instrument(
        skip(self, request),
        fields(method = request.method, request_uri = request.request_uri)
    )]
    pub async fn evaluate(&self, request: &AuthorizationRequest<'_>) -> AuthorizationOutcome {
        let Some(credential) = request.presented_credential() else {
            debug!(
                repository = resolver::repository_from_uri(request.request_uri).unwrap_or(""),
                "no client certificate presented"
            );
            return AuthorizationOutcome::Denied {
                reason: DenialReason::MissingCredential,
            };
        };

        if should_bypass(request.method, request.request_uri) {
            debug!("request bypasses entitlement verification");
            return AuthorizationOutcome::Authenticated {
                identity: AuthorizedIdentity::ping(),
            };
        }

        let resolved = resolver::resolve(request.request_uri, request.repository);
        debug!(
            repository = resolved.repository.as_str(),
            library = resolved.library.as_str(),
            "resolved resource path"
        );
        if !is_ping(request.request_uri) && resolved.is_empty() {
            error!("no repository name could be resolved for request");
            return AuthorizationOutcome::Denied {
                reason: DenialReason::NoResourcePath,
            };
        }

        let path = entitlement_path(&resolved.library);
        let result = match self.verifier.check_entitlement(credential, &path).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    error = %err,
                    path = path.as_str(),
                    "entitlement service returned error"
                );
                return AuthorizationOutcome::Denied {
                    reason: DenialReason::VerificationFailed(err),
                };
            }
        };

        if !result.is_verified() {
            error!(
                verified = result.verified.as_deref(),
                path = path.as_str(),
                "entitlement service returned unauthenticated/unauthorized"
            );
            return AuthorizationOutcome::Denied {
                reason: DenialReason::NotVerified,
            };
        }

        debug!(path = path.as_str(), "entitlement verified");
        AuthorizationOutcome::Authenticated {
            identity: AuthorizedIdentity::entitled(),
        }
    }

    pub async fn authorize(
        &self,
        request: &AuthorizationRequest<'_>,
    ) -> Result<AuthorizedIdentity, Challenge> {
        match self.evaluate(request).await {
            AuthorizationOutcome::Authenticated { identity } => Ok(identity),
            AuthorizationOutcome::Denied { reason } => {
                debug!(reason = reason.as_str(), "request denied");
                Err(Challenge::new(self.realm.clone(), reason))
            }
        }
    }
}

#[async_trait]
impl AccessController for EntitlementAccessController {
    async fn authorized(
        &self,
        request: &AuthorizationRequest<'_>,
    ) -> Result<AuthorizedIdentity, Challenge> {
        self.authorize(request).await
    }
}
