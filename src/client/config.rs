// Configuration for a Client Session, a fluent builder in the same shape
// as this crate's other option types.

use std::time::Duration;

/// Configuration accepted by `Client::construct`.
///
/// Site-local resolution of `server` from environment variables or a config
/// file is a front-end concern: the library only ever sees the
/// already-resolved host string.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname (default `127.0.0.1`).
    pub server: String,
    /// TCP port (default the protocol's fixed port, overridable for tests).
    pub port: u16,
    /// Skip the initial connect in `Client::construct`.
    pub no_connect: bool,
    /// Timeout, in seconds, for blocking waits.
    pub timeout: Duration,
    /// Verbose logging of application-level operations.
    pub verbose: bool,
    /// Enable raw-frame logging in the Router and persist to `raw.log`.
    pub debug: bool,
    /// Prefix received lines with a timestamp on `read_stream`.
    pub timestamp_data: bool,
    /// `chrono` format string used for the above prefix.
    pub timestamp_fmt: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: crate::codec::SERVER_PORT,
            no_connect: false,
            timeout: Duration::from_secs(5),
            verbose: false,
            debug: false,
            timestamp_data: false,
            timestamp_fmt: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration pointed at `server`, with every other
    /// field at its default.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_no_connect(mut self, no_connect: bool) -> Self {
        self.no_connect = no_connect;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_timestamp_data(mut self, timestamp_data: bool) -> Self {
        self.timestamp_data = timestamp_data;
        self
    }

    pub fn with_timestamp_fmt(mut self, timestamp_fmt: impl Into<String>) -> Self {
        self.timestamp_fmt = timestamp_fmt.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "127.0.0.1");
        assert_eq!(config.port, crate::codec::SERVER_PORT);
        assert!(!config.no_connect);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.timestamp_data);
    }

    #[test]
    fn builder_chains() {
        let config = ClientConfig::new("host.example")
            .with_port(9999)
            .with_timeout(Duration::from_secs(1))
            .with_debug(true)
            .with_timestamp_data(true)
            .with_timestamp_fmt("%H:%M:%S");

        assert_eq!(config.server, "host.example");
        assert_eq!(config.port, 9999);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert!(config.debug);
        assert!(config.timestamp_data);
        assert_eq!(config.timestamp_fmt, "%H:%M:%S");
    }
}
