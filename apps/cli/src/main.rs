//! paperpipe CLI: fetch research-paper PDFs and turn them into markdown.
//!
//! Reads a normalized record set, downloads each record's PDF, converts it
//! to markdown with a metadata header, and keeps an index and processing log.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli);
    commands::init_tracing(&cli, config.as_ref().ok().map(|c| &c.logging))?;
    commands::run(cli, config).await
}
