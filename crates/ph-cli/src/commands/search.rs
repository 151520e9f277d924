use anyhow::{Context, Result};

use ph_sdk::Session;

use crate::output::format::format_matches;
use crate::output::OutputFormat;

pub fn run(
    session: &Session,
    query: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let matches = session
        .search(query, limit)
        .context("Search failed (try --reindex if the index is missing)")?;

    if matches.is_empty() {
        eprintln!("No results found for: {query}");
        if let OutputFormat::Json = format {
            println!("[]");
        }
        return Ok(());
    }
    print!("{}", format_matches(&matches, format));
    Ok(())
}
