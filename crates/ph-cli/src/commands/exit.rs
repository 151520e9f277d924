use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::OutputFormat;

pub fn run(session: &Session, format: OutputFormat) -> Result<()> {
    let env = session.exit().context("Nothing to exit")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&env)?),
        OutputFormat::Text => println!("Exited environment {}", env.id),
    }
    Ok(())
}
