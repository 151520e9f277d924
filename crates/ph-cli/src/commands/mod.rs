pub mod ask;
pub mod capture;
pub mod commit;
pub mod env;
pub mod exit;
pub mod fetch;
pub mod gname;
pub mod history;
pub mod reindex;
pub mod search;
pub mod shell_init;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use ph_core::CoreError;
use ph_sdk::{SdkError, Session};

use crate::output::OutputFormat;
use crate::Cli;

/// Exit code for failures not covered below.
const EXIT_FAILURE: u8 = 1;
/// Operation needs an active environment and none is loaded.
const EXIT_NO_ENVIRONMENT: u8 = 3;
/// Git or remote failure.
const EXIT_GIT: u8 = 4;

/// The single action requested on the command line.
pub enum Action {
    Commit(String),
    Search(String),
    FetchEnv(String),
    Ask(String),
    Env(String),
    Exit,
    GroupName(String),
    Capture(capture::CaptureArgs),
    History,
    Reindex,
    ShellInit(shell_init::Shell),
}

impl Action {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let action = if let Some(message) = cli.commit {
            Action::Commit(message)
        } else if let Some(query) = cli.git_search {
            Action::Search(query)
        } else if let Some(repo) = cli.fetch_env {
            Action::FetchEnv(repo)
        } else if let Some(question) = cli.ask {
            Action::Ask(question)
        } else if let Some(source) = cli.env {
            Action::Env(source)
        } else if cli.exit {
            Action::Exit
        } else if let Some(name) = cli.gname {
            Action::GroupName(name)
        } else if let Some(command) = cli.capture {
            Action::Capture(capture::CaptureArgs {
                command,
                exit_status: cli.exit_status,
                cwd: cli.cwd,
                duration_ms: cli.duration_ms,
            })
        } else if cli.history {
            Action::History
        } else if cli.reindex {
            Action::Reindex
        } else if let Some(shell) = cli.shell_init {
            Action::ShellInit(shell)
        } else {
            bail!("no action given")
        };
        Ok(action)
    }
}

pub fn dispatch(
    action: Action,
    data_dir: Option<PathBuf>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    if let Action::ShellInit(shell) = action {
        return shell_init::run(shell);
    }

    let root = data_dir.unwrap_or_else(Session::default_root);
    let session = Session::open(&root)
        .with_context(|| format!("Failed to open data directory {}", root.display()))?;

    let result = match action {
        Action::Commit(message) => commit::run(&session, &message, format),
        Action::Search(query) => search::run(&session, &query, limit, format),
        Action::FetchEnv(repo) => fetch::run(&session, &repo, format),
        Action::Ask(question) => ask::run(&session, &question, limit, format),
        Action::Env(source) => env::run(&session, &source, format),
        Action::Exit => exit::run(&session, format),
        Action::GroupName(name) => gname::run(&session, &name, format),
        Action::Capture(args) => capture::run(&session, args, format),
        Action::History => history::run(&session, limit, format),
        Action::Reindex => reindex::run(&session, format),
        Action::ShellInit(_) => Ok(()),
    };
    let closed = session.close().context("Failed to flush the search index");
    result.and(closed)
}

/// Map an error's root cause to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<SdkError>() {
            if e.is_no_active_environment() {
                return EXIT_NO_ENVIRONMENT;
            }
            if e.is_git_failure() {
                return EXIT_GIT;
            }
        }
        if let Some(CoreError::NoActiveEnvironment) = cause.downcast_ref::<CoreError>() {
            return EXIT_NO_ENVIRONMENT;
        }
    }
    EXIT_FAILURE
}
