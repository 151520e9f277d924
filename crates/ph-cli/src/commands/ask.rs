use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::format::format_answer;
use crate::output::OutputFormat;

pub fn run(
    session: &Session,
    question: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let answer = session.ask(question, limit).context("Ask failed")?;
    print!("{}", format_answer(&answer, format));
    Ok(())
}
