use anyhow::{Context, Result};

use ph_sdk::{CancelToken, Session};

use crate::output::format::format_environment;
use crate::output::OutputFormat;

pub fn run(session: &Session, source: &str, format: OutputFormat) -> Result<()> {
    let env = session
        .load(source, &CancelToken::new())
        .with_context(|| format!("Failed to load environment from {source}"))?;
    print!("{}", format_environment(&env, format));
    Ok(())
}
