// The core module contains all routing logic.
// Nothing in here knows about Discord, HTTP or SQLite; those live in infra/
// and discord/ and plug in through the traits defined below.

#[path = "errors.rs"]
pub mod errors;

#[path = "config.rs"]
pub mod config;

#[path = "ai/mod.rs"]
pub mod ai;

#[path = "registry/mod.rs"]
pub mod registry;

#[path = "context/mod.rs"]
pub mod context;

#[path = "intent/mod.rs"]
pub mod intent;

#[path = "dispatch/mod.rs"]
pub mod dispatch;

#[path = "fallback/mod.rs"]
pub mod fallback;

#[path = "integration/integration_service.rs"]
pub mod integration;

#[cfg(test)]
#[path = "testing.rs"]
pub mod testing;
