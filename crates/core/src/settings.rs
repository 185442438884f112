use serde::Serialize;

/// Process-level knobs, assembled from CLI flags and environment variables
/// by the binary. Upstream provider credentials are never configured here;
/// they always flow in on inbound requests.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Bind host for the management API.
    pub host: String,
    /// Bind port for the management API.
    pub port: u16,
    /// SQLite database location.
    pub database: String,
    /// Default region used when re-signing Bedrock requests.
    pub aws_region: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            database: "rubberduck.db".to_string(),
            aws_region: "us-east-1".to_string(),
        }
    }
}
