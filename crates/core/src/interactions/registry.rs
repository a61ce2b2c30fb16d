use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::InteractionContext;
use crate::errors::{Error, Result};

/// Plugin instance created for one interaction.
pub trait InteractionHandler: Send {
    fn on_load(&mut self);

    /// Called when the screen changes and the handler is discarded.
    fn on_destroy(&mut self) {}
}

pub type HandlerFactory =
    Arc<dyn Fn(&InteractionContext) -> Box<dyn InteractionHandler> + Send + Sync>;

/// Handler factories registered by name at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&InteractionContext) -> Box<dyn InteractionHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Looks up `name`; a qualified `Module.Name` also matches a factory registered as `Name`.
    pub fn resolve(&self, name: &str) -> Option<HandlerFactory> {
        if let Some(factory) = self.factories.get(name) {
            return Some(factory.clone());
        }
        let (_, unqualified) = name.split_once('.')?;
        self.factories.get(unqualified).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Creates the handler for an interaction.
    pub fn instantiate(&self, context: InteractionContext) -> Result<ResolvedInteraction> {
        let factory = self
            .resolve(context.handler_name())
            .ok_or_else(|| Error::HandlerResolution(context.handler_name().to_string()))?;
        let handler = factory(&context);
        Ok(ResolvedInteraction { context, handler })
    }

    /// Instantiates every context, skipping (and logging) the ones without a handler.
    pub fn instantiate_all(&self, contexts: Vec<InteractionContext>) -> Vec<ResolvedInteraction> {
        contexts
            .into_iter()
            .filter_map(|context| {
                let interaction_id = context.interaction_id().to_string();
                self.instantiate(context)
                    .map_err(|e| {
                        warn!(
                            "[ProfileSync] Skipping interaction '{}': {}",
                            interaction_id, e
                        )
                    })
                    .ok()
            })
            .collect()
    }
}

/// An interaction paired with its live handler.
pub struct ResolvedInteraction {
    pub context: InteractionContext,
    pub handler: Box<dyn InteractionHandler>,
}

impl fmt::Debug for ResolvedInteraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedInteraction")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
