//! Intake server configuration

use serde::Deserialize;

/// Configuration for the intake HTTP server
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    /// Address to bind the intake server
    ///
    /// Common values:
    /// - `[::]:8000` (IPv6 any address, port 8000)
    /// - `0.0.0.0:8000` (IPv4 any address, port 8000)
    /// - `127.0.0.1:8000` (localhost only, port 8000)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Retry budget stamped onto every accepted job
    ///
    /// A job with a budget of 3 gets four attempts in total before it is
    /// dead-lettered.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_listen_address() -> String {
    "[::]:8000".to_string()
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            default_max_retries: default_max_retries(),
        }
    }
}
