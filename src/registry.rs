use crate::{
    constants::ENTITLEMENT_CONTROLLER,
    error::ConfigError,
    gate::{AccessController, EntitlementAccessController},
};
use serde_yaml::Value;
use std::{collections::HashMap, sync::Arc};

pub type ControllerOptions = HashMap<String, Value>;

pub type ControllerFactory = Arc<
    dyn Fn(&ControllerOptions) -> Result<Arc<dyn AccessController>, ConfigError> + Send + Sync,
>;

/// Named access-controller factories the host composes at startup.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    factories: HashMap<String, ControllerFactory>,
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ENTITLEMENT_CONTROLLER, |options| {
            let controller = EntitlementAccessController::from_options(options)?;
            Ok(Arc::new(controller) as Arc<dyn AccessController>)
        });
        registry
    }

    /// Registers `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ControllerOptions) -> Result<Arc<dyn AccessController>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn create(
        &self,
        name: &str,
        options: &ControllerOptions,
    ) -> Result<Arc<dyn AccessController>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownController(name.to_string()))?;
        factory(options)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.factories.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// Typed access to a controller's loosely-typed option map.
pub struct OptionReader<'a> {
    controller: &'a str,
    options: &'a ControllerOptions,
}

impl<'a> OptionReader<'a> {
    pub fn new(controller: &'a str, options: &'a ControllerOptions) -> Self {
        Self {
            controller,
            options,
        }
    }

    pub fn required_string(&self, key: &str) -> Result<String, ConfigError> {
        match self.options.get(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(_) => Err(self.invalid(key, "a string")),
            None => Err(ConfigError::MissingOption {
                controller: self.controller.to_string(),
                key: key.to_string(),
            }),
        }
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(value)) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a non-negative integer")),
            Some(Value::String(value)) => value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| self.invalid(key, "a non-negative integer")),
            Some(_) => Err(self.invalid(key, "a non-negative integer")),
        }
    }

    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(value)) => Ok(Some(*value)),
            Some(Value::String(value)) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(self.invalid(key, "a boolean")),
            },
            Some(_) => Err(self.invalid(key, "a boolean")),
        }
    }

    fn invalid(&self, key: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidOption {
            controller: self.controller.to_string(),
            key: key.to_string(),
            expected,
        }
    }
}
