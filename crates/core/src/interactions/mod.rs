//! Interactions and connections returned for a screen, and the handlers they resolve to.

mod connection;
mod context;
mod registry;

pub use connection::{parse_connections, Connection};
pub use context::{resolve_locale_parameters, InteractionContext};
pub use registry::{HandlerFactory, HandlerRegistry, InteractionHandler, ResolvedInteraction};
