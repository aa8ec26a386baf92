//! Action registry: maps action identifiers to handlers.
//!
//! Built once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::action::ActionHandler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action '{0}' is not registered")]
    NotRegistered(String),

    #[error("action '{0}' is already registered")]
    Duplicate(String),
}

/// Collects handlers before the registry is frozen.
#[derive(Default)]
pub struct ActionRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `action_id`. Registering the same id
    /// twice is a startup error.
    pub fn register<H>(mut self, action_id: impl Into<String>, handler: H) -> Result<Self, RegistryError>
    where
        H: ActionHandler + 'static,
    {
        let action_id = action_id.into();
        if self.handlers.contains_key(&action_id) {
            return Err(RegistryError::Duplicate(action_id));
        }
        self.handlers.insert(action_id, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable map from action identifier to handler.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    /// An empty registry: only verification-only challenges can be
    /// issued against it.
    pub fn empty() -> Self {
        ActionRegistryBuilder::new().build()
    }

    pub fn resolve(&self, action_id: &str) -> Result<Arc<dyn ActionHandler>, RegistryError> {
        self.handlers
            .get(action_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(action_id.to_string()))
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.handlers.contains_key(action_id)
    }

    /// Registered identifiers, sorted.
    pub fn action_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use warden_core::error::WardenError;

    use super::*;
    use crate::action::{ActionContext, ActionExecutionResult};

    struct Noop;

    #[async_trait]
    impl ActionHandler for Noop {
        async fn execute(
            &self,
            _ctx: &ActionContext,
            _metadata: &serde_json::Value,
        ) -> Result<ActionExecutionResult, WardenError> {
            Ok(ActionExecutionResult::succeeded())
        }
    }

    #[test]
    fn resolve_registered_action() {
        let registry = ActionRegistry::builder()
            .register("NOOP", Noop)
            .unwrap()
            .build();

        assert!(registry.contains("NOOP"));
        assert!(registry.resolve("NOOP").is_ok());
        assert_eq!(registry.action_ids(), vec!["NOOP"]);
    }

    #[test]
    fn resolve_unknown_action_fails() {
        let registry = ActionRegistry::empty();
        assert_eq!(
            registry.resolve("REFUND").err(),
            Some(RegistryError::NotRegistered("REFUND".into()))
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = ActionRegistry::builder()
            .register("NOOP", Noop)
            .unwrap()
            .register("NOOP", Noop);
        assert_eq!(result.err(), Some(RegistryError::Duplicate("NOOP".into())));
    }
}
