//! Repository-wide constants.

/// User agent used for all outgoing HTTP requests.
pub const USER_AGENT: &str = concat!("quarry/v", env!("CARGO_PKG_VERSION"));
