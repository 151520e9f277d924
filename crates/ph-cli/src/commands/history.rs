use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::format::format_history;
use crate::output::OutputFormat;

pub fn run(session: &Session, limit: Option<usize>, format: OutputFormat) -> Result<()> {
    let records = session.history(limit).context("Failed to read history")?;
    print!("{}", format_history(&records, format));
    Ok(())
}
