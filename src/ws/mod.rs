pub mod actor;
pub mod frame;
pub mod handler;

use std::time::Duration;

/// Channel read deadline. An agent that stays silent longer than this is
/// presumed dead and its channel is closed. Agents keep the channel alive by
/// sending `ping` frames; the server replies `pong` and never originates
/// pings.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
