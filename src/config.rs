use crate::{constants::ENTITLEMENT_CONTROLLER, error::ConfigError, registry::ControllerOptions};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use config::{Config as SettingsLoader, Environment};
use serde::Deserialize;
use serde_yaml::Value;
use std::{net::SocketAddr, path::PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct AccessControlConfig {
    pub controller: String,
    pub options: ControllerOptions,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            controller: ENTITLEMENT_CONTROLLER.to_string(),
            options: ControllerOptions::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub log_level: String,
    pub trust_proxy: bool,
    pub access: AccessControlConfig,
}

#[derive(Debug, Default)]
struct RawEnvConfig {
    config: Option<String>,
    config_base64: Option<String>,
    bind: Option<String>,
    log_level: Option<String>,
    trust_proxy: Option<String>,
    auth_controller: Option<String>,
    realm: Option<String>,
    service_path: Option<String>,
    timeout_ms: Option<String>,
    insecure_skip_verify: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_cfg = load_gate_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_env_config_sources_if_present(&env_cfg)?;
        cfg.apply_env_overrides(&env_cfg);
        Ok(cfg)
    }

    pub fn from_env_with_config_file(config_path: PathBuf) -> Result<Self, ConfigError> {
        let env_cfg = load_gate_env()?;
        let mut cfg = Self::from_yaml_file(config_path)?;
        cfg.apply_env_overrides(&env_cfg);
        Ok(cfg)
    }

    pub fn defaults() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5001)),
            log_level: "info".to_string(),
            trust_proxy: false,
            access: AccessControlConfig::default(),
        }
    }

    fn apply_env_config_sources_if_present(
        &mut self,
        env_cfg: &RawEnvConfig,
    ) -> Result<(), ConfigError> {
        let config_path = non_empty(env_cfg.config.as_deref());
        let config_b64 = non_empty(env_cfg.config_base64.as_deref());

        match (config_path, config_b64) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "ENTITLEMENT_GATE_CONFIG and ENTITLEMENT_GATE_CONFIG_BASE64 are both set; use only one"
                    .to_string(),
            )),
            (Some(path), None) => {
                *self = Self::from_yaml_file(PathBuf::from(path)).map_err(|err| {
                    ConfigError::Invalid(format!(
                        "failed to load ENTITLEMENT_GATE_CONFIG={path}: {err}"
                    ))
                })?;
                Ok(())
            }
            (None, Some(value)) => {
                let compact = value
                    .chars()
                    .filter(|ch| !ch.is_ascii_whitespace())
                    .collect::<String>();
                let decoded = B64.decode(compact).map_err(|err| {
                    ConfigError::Invalid(format!(
                        "failed to decode ENTITLEMENT_GATE_CONFIG_BASE64: {err}"
                    ))
                })?;
                let yaml = String::from_utf8(decoded).map_err(|err| {
                    ConfigError::Invalid(format!(
                        "failed to decode ENTITLEMENT_GATE_CONFIG_BASE64: decoded bytes are not UTF-8 ({err})"
                    ))
                })?;
                *self = Self::from_yaml_str("ENTITLEMENT_GATE_CONFIG_BASE64", &yaml)?;
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    fn apply_env_overrides(&mut self, env_cfg: &RawEnvConfig) {
        if let Some(bind) = parse_env_value::<SocketAddr>(env_cfg.bind.as_deref()) {
            self.bind = bind;
        }
        if let Some(value) = non_empty(env_cfg.log_level.as_deref()) {
            self.log_level = value.to_string();
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.trust_proxy.as_deref()) {
            self.trust_proxy = parsed;
        }
        if let Some(value) = non_empty(env_cfg.auth_controller.as_deref())
            && value != self.access.controller
        {
            self.access = AccessControlConfig {
                controller: value.to_string(),
                options: ControllerOptions::new(),
            };
        }

        let overrides = [
            ("realm", &env_cfg.realm),
            ("servicePath", &env_cfg.service_path),
            ("timeoutMs", &env_cfg.timeout_ms),
            ("insecureSkipVerify", &env_cfg.insecure_skip_verify),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                self.access
                    .options
                    .insert(key.to_string(), Value::String(value.clone()));
            }
        }
    }

    pub fn from_yaml_file(path: PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|err| {
            ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&path.display().to_string(), &text)
    }

    pub fn from_yaml_str(source: &str, text: &str) -> Result<Self, ConfigError> {
        let parsed = serde_yaml::from_str::<YamlConfig>(text)
            .map_err(|err| ConfigError::Invalid(format!("failed to parse {source}: {err}")))?;
        Self::from_yaml_config(parsed)
    }

    fn from_yaml_config(parsed: YamlConfig) -> Result<Self, ConfigError> {
        let defaults = Self::defaults();
        let listen = match &parsed.listen {
            Some(StringOrVec::One(value)) => Some(value.as_str()),
            Some(StringOrVec::Many(values)) => values.first().map(String::as_str),
            None => None,
        };
        let bind = match listen.map(str::trim) {
            Some(listen) if !listen.is_empty() => parse_listen(listen)?,
            _ => defaults.bind,
        };
        let log_level = parsed
            .log
            .and_then(|log| log.level)
            .unwrap_or(defaults.log_level);
        let trust_proxy = parsed
            .server
            .and_then(|server| server.trust_proxy)
            .unwrap_or(false);
        let access = match parsed.auth {
            Some(auth) => parse_auth_section(auth)?,
            None => defaults.access,
        };

        Ok(Self {
            bind,
            log_level,
            trust_proxy,
            access,
        })
    }
}

#[derive(Debug, Deserialize)]
struct YamlConfig {
    listen: Option<StringOrVec>,
    log: Option<YamlLog>,
    server: Option<YamlServer>,
    auth: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrVec {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct YamlLog {
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YamlServer {
    #[serde(rename = "trustProxy")]
    trust_proxy: Option<bool>,
}

/// `auth:` holds exactly one `<controller>: { options }` entry.
fn parse_auth_section(auth: serde_yaml::Mapping) -> Result<AccessControlConfig, ConfigError> {
    if auth.len() != 1 {
        return Err(ConfigError::Invalid(format!(
            "auth section must configure exactly one access controller (found {})",
            auth.len()
        )));
    }
    let Some((name, value)) = auth.into_iter().next() else {
        return Err(ConfigError::Invalid("auth section is empty".to_string()));
    };
    let controller = name
        .as_str()
        .ok_or_else(|| ConfigError::Invalid("invalid access controller name".to_string()))?
        .to_string();

    let mut options = ControllerOptions::new();
    match value {
        Value::Null => {}
        Value::Mapping(mapping) => {
            for (key, value) in mapping {
                let key = key.as_str().ok_or_else(|| {
                    ConfigError::Invalid(format!("invalid option key for {controller}"))
                })?;
                options.insert(key.to_string(), value);
            }
        }
        _ => {
            return Err(ConfigError::Invalid(format!(
                "options for {controller} must be a mapping"
            )));
        }
    }
    Ok(AccessControlConfig {
        controller,
        options,
    })
}

fn parse_listen(listen: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = listen
        .strip_prefix("http://")
        .unwrap_or(listen)
        .trim_end_matches('/');
    let normalized = if normalized.starts_with(':') {
        format!("0.0.0.0{normalized}")
    } else {
        normalized.to_string()
    };
    normalized
        .parse::<SocketAddr>()
        .map_err(|err| ConfigError::Invalid(format!("invalid listen address {listen}: {err}")))
}

fn load_gate_env() -> Result<RawEnvConfig, ConfigError> {
    let settings = SettingsLoader::builder()
        .add_source(Environment::with_prefix("ENTITLEMENT_GATE").try_parsing(false))
        .build()
        .map_err(|err| {
            ConfigError::Invalid(format!(
                "failed to load ENTITLEMENT_GATE_* environment: {err}"
            ))
        })?;

    Ok(RawEnvConfig {
        config: env_value_for_var(&settings, "ENTITLEMENT_GATE_CONFIG"),
        config_base64: env_value_for_var(&settings, "ENTITLEMENT_GATE_CONFIG_BASE64"),
        bind: env_value_for_var(&settings, "ENTITLEMENT_GATE_BIND"),
        log_level: env_value_for_var(&settings, "ENTITLEMENT_GATE_LOG_LEVEL"),
        trust_proxy: env_value_for_var(&settings, "ENTITLEMENT_GATE_TRUST_PROXY"),
        auth_controller: env_value_for_var(&settings, "ENTITLEMENT_GATE_AUTH_CONTROLLER"),
        realm: env_value_for_var(&settings, "ENTITLEMENT_GATE_REALM"),
        service_path: env_value_for_var(&settings, "ENTITLEMENT_GATE_SERVICE_PATH"),
        timeout_ms: env_value_for_var(&settings, "ENTITLEMENT_GATE_TIMEOUT_MS"),
        insecure_skip_verify: env_value_for_var(
            &settings,
            "ENTITLEMENT_GATE_INSECURE_SKIP_VERIFY",
        ),
    })
}

fn env_value_for_var(settings: &SettingsLoader, env_var: &str) -> Option<String> {
    let key = env_var
        .strip_prefix("ENTITLEMENT_GATE_")
        .unwrap_or(env_var)
        .to_ascii_lowercase();
    settings.get_string(&key).ok()
}

fn parse_env_value<T>(raw: Option<&str>) -> Option<T>
where
    T: std::str::FromStr,
{
    raw.and_then(|value| value.trim().parse::<T>().ok())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
