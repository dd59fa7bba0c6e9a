mod commands;
mod config;
mod fixture;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{diff, init, serialize, DiffArgs, InitArgs, SerializeArgs};
use config::Config;
use tracing::Level;

/// Tether CLI - inspect how native object graphs cross the glue boundary
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (overrides the configured one)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default tether.config.json and an example fixture
    Init(InitArgs),

    /// Bind a fixture graph and print the envelope a mirror would receive
    Serialize(SerializeArgs),

    /// Print the collection edits that turn one sequence into another
    Diff(DiffArgs),
}

fn install_logging(cli: &Cli, cwd: &str) {
    let configured = Config::load(cwd)
        .map(|config| config.sync.log_level)
        .unwrap_or_else(|_| "info".to_string());
    let name = cli.log_level.clone().unwrap_or(configured);
    let level = name.parse::<Level>().unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()
        .expect("Cannot get current directory")
        .display()
        .to_string();

    install_logging(&cli, &cwd);

    let result = match cli.command {
        Command::Init(args) => init(args, &cwd),
        Command::Serialize(args) => serialize(args, &cwd),
        Command::Diff(args) => diff(args, &cwd),
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
