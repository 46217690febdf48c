mod agent_registry;

pub use agent_registry::{AgentConstructor, AgentRegistry, RegistryError};
