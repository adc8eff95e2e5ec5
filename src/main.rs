use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use treetidy::cli::{OrganizeCommand, run_cli_with_config};
use treetidy::logging::init_logger;
use treetidy::output::OutputFormatter;

/// Organize a directory into category, group, type and date folders.
#[derive(Debug, Parser)]
#[command(name = "treetidy", version, about)]
struct Args {
    /// Directory to organize
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Show the planned moves without touching any file
    #[arg(long, conflicts_with_all = ["undo", "history"])]
    dry_run: bool,

    /// Revert the most recent organization
    #[arg(long, conflicts_with = "history")]
    undo: bool,

    /// List the organizations that can still be undone
    #[arg(long)]
    history: bool,

    /// Profile file (defaults to ./.treetidyrc.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Skip the semantic grouping stage
    #[arg(long)]
    no_semantic: bool,

    /// Log pipeline stages to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);

    let command = if args.undo {
        OrganizeCommand::Undo
    } else if args.history {
        OrganizeCommand::History
    } else {
        OrganizeCommand::Organize {
            dry_run: args.dry_run,
            semantic: !args.no_semantic,
        }
    };

    match run_cli_with_config(command, &args.dir, args.config.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&e);
            ExitCode::FAILURE
        }
    }
}
