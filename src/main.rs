mod app;
mod cli;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    let output = if cli.log_to_file || cli.log_dir.is_some() {
        rubberduck_core::logging::LogOutput::File {
            dir: cli.log_dir.clone().unwrap_or_else(|| "./logs".to_string()),
        }
    } else {
        rubberduck_core::logging::LogOutput::Stderr
    };
    let _guard = rubberduck_core::logging::init_logging(&cli.log_level, output);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(app::run(&cli))
}
