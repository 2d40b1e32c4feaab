//! weld: keep directories of several base repositories in one repository.
//!
//! # Usage
//!
//! ```text
//! weld pull <base> | --all [--bulk] [--manual] [--grouped] [--rebase] [--edit]
//!                          [--ignore-bad-patches] [--ignore-history] [--sanitise <script>]
//! weld push <base> [--upstream] [--bulk] [--manual] [--grouped] [--edit] ...
//! weld step | commit | sanitise | finish | abort | inspect
//! weld continue
//! weld status [--json]
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{pull::PullArgs, push::PushArgs, status::StatusArgs};
use weld_sync::Verb;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "weld",
    version,
    about = "Synchronise directories of base repositories with a weld repository",
    long_about = None,
)]
struct Cli {
    /// Weld root; found by walking up from the current directory when omitted.
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay new commits of a base into the weld.
    Pull(PullArgs),

    /// Replay weld commits back into a base.
    Push(PushArgs),

    /// Replay the next base (or weld) commit of the operation in progress.
    Step,

    /// Commit the changes replayed so far.
    Commit,

    /// Run the sanitise script over the pending changes and log.
    Sanitise,

    /// Fold the working branch back and record the sync point.
    Finish,

    /// Roll the operation in progress back.
    Abort,

    /// Describe the operation in progress.
    Inspect,

    /// Resume driving the operation in progress.
    Continue,

    /// Show the last sync point of every base.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();
    let root = cli.root.as_deref();
    match cli.command {
        Commands::Pull(args) => args.run(root),
        Commands::Push(args) => args.run(root),
        Commands::Step => commands::verbs::run(root, Verb::Step),
        Commands::Commit => commands::verbs::run(root, Verb::Commit),
        Commands::Sanitise => commands::verbs::run(root, Verb::Sanitise),
        Commands::Finish => commands::verbs::run(root, Verb::Finish),
        Commands::Abort => commands::verbs::run(root, Verb::Abort),
        Commands::Inspect => commands::verbs::run(root, Verb::Inspect),
        Commands::Continue => commands::verbs::resume(root),
        Commands::Status(args) => args.run(root).map(|()| ExitCode::SUCCESS),
    }
}
