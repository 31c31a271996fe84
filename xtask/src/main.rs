use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the blup workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the whole workspace
    Build,
    /// Run the blup CLI, forwarding any extra arguments
    Run {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run the test suite
    Test,
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.first().unwrap_or(&""));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => cargo(&["build", "--workspace"]),
        Commands::Run { args } => {
            let mut full = vec!["run", "-p", "blup-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full)
        }
        Commands::Test => cargo(&["test", "--workspace"]),
    }
}
