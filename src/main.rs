use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use livelist::{
    cli::{self, RootCommand},
    logging::{init_logging, print_log_location},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(
    name = "livelist",
    about = "Live, query-driven lists over notes and JSON search endpoints",
    long_about = "Reads queries from stdin, one per line, and prints the reconciled list \
                  after every commit. Type :refresh to re-run the current query, :more for \
                  the next page and :quit to exit.",
    version = env!("LIVELIST_BUILD_VERSION"),
    author
)]
struct Cli {
    /// Print results and errors as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Settings file to use instead of the default location.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: RootCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log = match init_logging() {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err:#}");
            None
        }
    };

    let cli = Cli::parse();
    let settings = match cli.config.as_deref() {
        Some(path) => Settings::load_from_path(path),
        None => Settings::load(),
    };

    let code = cli::run(cli.command, &settings, cli.json).await;
    if code != 0 {
        if let Some(handle) = log.as_ref() {
            print_log_location(&handle.path);
        }
        // Flush the log writer before exiting.
        drop(log);
        std::process::exit(code);
    }

    Ok(())
}
