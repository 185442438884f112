use clap::Parser;

/// Locally-hosted reverse-proxy fleet that emulates commercial LLM provider
/// APIs with configurable failure simulation and response caching.
#[derive(Debug, Parser)]
#[command(name = "rubberduck", version)]
pub struct Cli {
    /// Management API bind host
    #[arg(long, env = "RUBBERDUCK_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Management API bind port
    #[arg(long, env = "RUBBERDUCK_PORT", default_value_t = 9000)]
    pub port: u16,

    /// SQLite database location
    #[arg(long, env = "RUBBERDUCK_DATABASE", default_value = "rubberduck.db")]
    pub database: String,

    /// Default region for Bedrock request re-signing
    #[arg(long, env = "AWS_DEFAULT_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write logs to daily-rotated files instead of stderr
    #[arg(long)]
    pub log_to_file: bool,

    /// Directory for file logs (implies --log-to-file)
    #[arg(long)]
    pub log_dir: Option<String>,
}
