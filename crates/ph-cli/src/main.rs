use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

use commands::shell_init::Shell;

#[derive(Parser)]
#[command(
    name = "ph",
    version,
    about = "Log terminal commands per environment and search them semantically"
)]
#[command(group(ArgGroup::new("action").required(true).multiple(false)))]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    /// Data directory (default: ~/.ph)
    #[arg(long, env = "PH_HOME", global = true)]
    data_dir: Option<PathBuf>,

    /// Maximum number of results for search, ask and history
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Commit the active environment's new commands to its repository
    #[arg(short, long, value_name = "MESSAGE", group = "action")]
    commit: Option<String>,

    /// Search the active environment's commands by similarity
    #[arg(short = 's', long = "git-search", value_name = "QUERY", group = "action")]
    git_search: Option<String>,

    /// Fetch an environment snapshot from a git repository
    #[arg(short, long = "fetch-env", value_name = "REPO", group = "action")]
    fetch_env: Option<String>,

    /// Ask a question about the active environment's history
    #[arg(short, long, value_name = "QUESTION", group = "action")]
    ask: Option<String>,

    /// Load a directory or git repository as the active environment
    #[arg(short, long = "env", value_name = "SOURCE", group = "action")]
    env: Option<String>,

    /// Deactivate the active environment
    #[arg(long, group = "action")]
    exit: bool,

    /// Tag the current directory with a group name
    #[arg(long, value_name = "NAME", group = "action")]
    gname: Option<String>,

    /// Record a command (used by the shell hook)
    #[arg(long, value_name = "COMMAND", group = "action", hide = true)]
    capture: Option<String>,

    #[arg(long, requires = "capture", hide = true)]
    exit_status: Option<i32>,

    #[arg(long, requires = "capture", hide = true)]
    cwd: Option<PathBuf>,

    #[arg(long, requires = "capture", hide = true)]
    duration_ms: Option<u64>,

    /// List the active environment's commands
    #[arg(long, group = "action")]
    history: bool,

    /// Rebuild the active environment's search index
    #[arg(long, group = "action")]
    reindex: bool,

    /// Print the shell hook that records commands
    #[arg(long, value_name = "SHELL", group = "action")]
    shell_init: Option<Shell>,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format = cli.format;
    let data_dir = cli.data_dir.clone();
    let limit = cli.limit;
    let result = commands::Action::from_cli(cli)
        .and_then(|action| commands::dispatch(action, data_dir, limit, format));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(commands::exit_code(&err))
        }
    }
}
