//! Cumulo CLI — declarative cloud topology provisioning.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "cumulo",
    version,
    about = "Declarative cloud topology provisioning — dependency-graph apply, write-once outputs, provenance tracing"
)]
struct Cli {
    #[command(subcommand)]
    command: cumulo::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cumulo::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
