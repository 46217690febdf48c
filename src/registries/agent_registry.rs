use crate::agents::{Agent, LintAgent, SecurityScanAgent};
use crate::config::Config;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Builds a fresh agent from configuration
pub type AgentConstructor = Box<dyn Fn(&Config) -> Box<dyn Agent> + Send + Sync>;

/// Errors raised by the agent registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent not found: {id}. Available agents: {}", available.join(", "))]
    NotFound { id: String, available: Vec<String> },

    #[error("agent already registered: {0}")]
    Duplicate(String),
}

/// Maps agent ids to their constructors.
///
/// A registry is built once at startup and handed to the runner and CLI by
/// reference. Ids are unique for the lifetime of the registry.
#[derive(Default)]
pub struct AgentRegistry {
    constructors: BTreeMap<String, AgentConstructor>,
}

impl AgentRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every agent shipped with the binary
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(LintAgent::ID, |config: &Config| -> Box<dyn Agent> {
            Box::new(LintAgent::new(config.artifacts_dir()))
        });
        registry.register(SecurityScanAgent::ID, |config: &Config| -> Box<dyn Agent> {
            Box::new(SecurityScanAgent::new(config.clone()))
        });
        registry
    }

    /// Registers `constructor` under `id`.
    ///
    /// # Panics
    /// Panics if `id` is already registered. Registration happens during
    /// startup and a duplicate id is a programming error.
    pub fn register<F>(&mut self, id: &str, constructor: F)
    where
        F: Fn(&Config) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        if let Err(e) = self.try_register(id, constructor) {
            panic!("{e}");
        }
    }

    /// Registers `constructor` under `id`, refusing to overwrite an existing entry
    pub fn try_register<F>(&mut self, id: &str, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn(&Config) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(id) {
            return Err(RegistryError::Duplicate(id.to_string()));
        }
        self.constructors.insert(id.to_string(), Box::new(constructor));
        Ok(())
    }

    /// Constructs a new agent instance for `id`
    pub fn resolve(&self, id: &str, config: &Config) -> Result<Box<dyn Agent>, RegistryError> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| RegistryError::NotFound {
                id: id.to_string(),
                available: self.list_ids(),
            })?;
        Ok(constructor(config))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    /// All registered ids in lexicographic order
    pub fn list_ids(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("ids", &self.list_ids())
            .finish()
    }
}
