//! sigmahub - RB Sigma Hub sync layer
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use sigmahub::cli::{self, Cli};
use sigmahub::core::logging::{self, LogSettings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = LogSettings::resolve(cli.log_level.as_deref(), cli.json_output, cli.verbose);
    logging::init(&settings);

    let format = cli.effective_format();
    let pretty = cli.pretty;

    match cli::run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(code = e.error_code(), "{e}");
            eprintln!("{}", sigmahub::render::error::render_error(&e, format, pretty));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
