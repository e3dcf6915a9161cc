// The infra module contains implementations of core traits.
// Each outbound concern goes in its own submodule.

#[path = "http.rs"]
pub mod http;

#[path = "ai/mod.rs"]
pub mod ai;

#[path = "google/mod.rs"]
pub mod google;

#[path = "context/mod.rs"]
pub mod context;
