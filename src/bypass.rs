use crate::constants::{BYPASS_METHODS, PING_PATH};

/// True when the request skips entitlement verification: the registry ping
/// endpoint (exact match on the raw URI) or a method from the fixed set.
pub fn should_bypass(method: &str, request_uri: &str) -> bool {
    is_ping(request_uri) || BYPASS_METHODS.contains(&method)
}

pub fn is_ping(request_uri: &str) -> bool {
    request_uri == PING_PATH
}
