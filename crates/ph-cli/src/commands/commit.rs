use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::format::format_snapshot;
use crate::output::OutputFormat;

pub fn run(session: &Session, message: &str, format: OutputFormat) -> Result<()> {
    let snapshot = session
        .commit(message)
        .context("Failed to commit environment")?;
    print!("{}", format_snapshot(&snapshot, format));
    Ok(())
}
