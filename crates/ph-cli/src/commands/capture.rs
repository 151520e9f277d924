use std::path::PathBuf;

use anyhow::{Context, Result};

use ph_sdk::{RecordDraft, Session};

use crate::output::OutputFormat;

pub struct CaptureArgs {
    pub command: String,
    pub exit_status: Option<i32>,
    pub cwd: Option<PathBuf>,
    pub duration_ms: Option<u64>,
}

pub fn run(session: &Session, args: CaptureArgs, format: OutputFormat) -> Result<()> {
    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let mut draft = RecordDraft::new(args.command, cwd);
    if let Some(code) = args.exit_status {
        draft = draft.exit_code(code);
    }
    if let Some(ms) = args.duration_ms {
        draft = draft.duration_ms(ms);
    }

    let record = session.capture(draft).context("Failed to record command")?;
    tracing::debug!(record = %record.id, "captured command");
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}
