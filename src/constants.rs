pub const HEADER_JSON: &str = "application/json";

/// `SSL_CLIENT_CERT`, filled by the TLS terminator with the client certificate in PEM form.
pub const CLIENT_CERT_HEADER: &str = "ssl_client_cert";
pub const IDENTITY_HEADER: &str = "x-entitlement-identity";
pub const FORWARDED_METHOD_HEADER: &str = "x-forwarded-method";
pub const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";

pub const API_PREFIX: &str = "/v2/";
pub const PING_PATH: &str = "/v2/";
pub const ROUTE_MARKERS: [&str; 3] = ["/manifests/", "/tags/", "/blobs/"];
pub const REPOSITORY_PARAM: &str = "name";
pub const NAMESPACE_PARAM: &str = "ns";
pub const REPO_PARAM: &str = "repo";
pub const BYPASS_METHODS: [&str; 4] = ["POST", "HEAD", "PATCH", "PUT"];

pub const CONTENT_TREE_PREFIX: &str =
    "/content/dist/rhel/server/7/7Server/x86_64/containers/registry/";
pub const VERIFY_ENDPOINT: &str = "/verify";

pub const IDENTITY_PING: &str = "entitled-ping";
pub const IDENTITY_ENTITLED: &str = "entitled";

pub const AUTH_FAILURE_MESSAGE: &str = "Authentication Failure";
pub const CHALLENGE_SCHEME: &str = "Entitlement";

pub const ENTITLEMENT_CONTROLLER: &str = "entitlement";
pub const ERROR_BODY_SNIPPET_LEN: usize = 256;
pub const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024;
