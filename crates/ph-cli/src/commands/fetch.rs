use anyhow::{Context, Result};

use ph_sdk::{CancelToken, Session};

use crate::output::format::format_environment;
use crate::output::OutputFormat;

pub fn run(session: &Session, repo: &str, format: OutputFormat) -> Result<()> {
    let env = session
        .fetch(repo, &CancelToken::new())
        .with_context(|| format!("Failed to fetch environment from {repo}"))?;
    if let OutputFormat::Text = format {
        eprintln!(
            "Fetched environment {} (load it with: ph --env {})",
            env.id,
            env.workdir.display()
        );
    }
    print!("{}", format_environment(&env, format));
    Ok(())
}
