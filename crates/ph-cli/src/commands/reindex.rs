use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::OutputFormat;

pub fn run(session: &Session, format: OutputFormat) -> Result<()> {
    let count = session.reindex().context("Failed to rebuild index")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "indexed": count })),
        OutputFormat::Text => eprintln!("Indexed {count} command(s)"),
    }
    Ok(())
}
