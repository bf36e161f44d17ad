//! Server configuration.
//!
//! The service has a fixed surface: no command-line flags and no environment
//! variables beyond `RUST_LOG` for log verbosity. Everything else is decided
//! here in code.

use crate::storage::ExpiryConfig;

/// Settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Run the background expiry sweeper. Reads honour expiry either way.
    pub active_expiry: bool,
    pub expiry: ExpiryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            active_expiry: true,
            expiry: ExpiryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
