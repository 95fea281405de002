pub mod handler;
pub mod response;

use std::time::Duration;

/// Fixed upstream origin prepended to every proxied request-URI before it is
/// handed to the agent. Single-target policy; intentionally not configurable.
pub const UPSTREAM_ORIGIN: &str = "https://generativelanguage.googleapis.com";

/// Total time allowed for one proxied request, measured from frame dispatch
/// to the final response frame. Applies to streaming responses as a whole,
/// not per chunk.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
