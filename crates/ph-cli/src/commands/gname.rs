use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::OutputFormat;

pub fn run(session: &Session, name: &str, format: OutputFormat) -> Result<()> {
    let dir = std::env::current_dir().context("Cannot determine current directory")?;
    let tag = session
        .tag_group(&dir, name)
        .context("Failed to write group file")?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "dir": tag.dir, "group": tag.name })
        ),
        OutputFormat::Text => println!("Group '{}' set for {}", tag.name, tag.dir.display()),
    }
    Ok(())
}
