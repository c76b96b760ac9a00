//! Configuration surface for [`crate::Communicator`].

use std::time::Duration;

/// Number of connection attempts `request_connection` makes before giving up.
///
/// The original blocked forever; this crate bounds the retry loop instead,
/// at roughly a minute of wall-clock time with the default interval.
pub const DEFAULT_CONNECT_ATTEMPT_LIMIT: usize = 600;

/// Delay between successive connect attempts in `request_connection`.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Parameters needed to bind a [`crate::Communicator`] to either the
/// accepting or the requesting side of a coupling connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// TCP port the acceptor listens on and the requester connects to.
    pub port: u16,
    /// Name of the participant that calls `accept_connection`.
    pub acceptor_name: String,
    /// Name of the participant that calls `request_connection`.
    pub requester_name: String,
    /// This participant's own rank within its local communicator.
    pub local_rank: usize,
    /// Size of this participant's local communicator.
    pub local_size: usize,
    /// Bound on connect attempts, see [`DEFAULT_CONNECT_ATTEMPT_LIMIT`].
    #[serde(default = "default_connect_attempt_limit")]
    pub connect_attempt_limit: usize,
}

fn default_connect_attempt_limit() -> usize {
    DEFAULT_CONNECT_ATTEMPT_LIMIT
}

impl Config {
    /// Builds a config with the default connect attempt limit.
    pub fn new(
        port: u16,
        acceptor_name: impl Into<String>,
        requester_name: impl Into<String>,
        local_rank: usize,
        local_size: usize,
    ) -> Self {
        Self {
            port,
            acceptor_name: acceptor_name.into(),
            requester_name: requester_name.into(),
            local_rank,
            local_size,
            connect_attempt_limit: DEFAULT_CONNECT_ATTEMPT_LIMIT,
        }
    }

    /// Overrides the connect attempt limit, e.g. for tests that want fast
    /// failure instead of the ~60 second default budget.
    pub fn with_connect_attempt_limit(mut self, limit: usize) -> Self {
        self.connect_attempt_limit = limit;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_uses_default_attempt_limit() {
        let config = Config::new(50000, "Fluid", "Solid", 0, 1);
        assert_eq!(config.connect_attempt_limit, DEFAULT_CONNECT_ATTEMPT_LIMIT);
    }

    #[test]
    fn with_connect_attempt_limit_overrides_default() {
        let config = Config::new(50000, "Fluid", "Solid", 0, 1).with_connect_attempt_limit(5);
        assert_eq!(config.connect_attempt_limit, 5);
    }
}
