use serde::Serialize;

use ph_sdk::{Answer, CommandRecord, CommitSnapshot, Environment, SearchMatch};

use super::OutputFormat;

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn status(record: &CommandRecord) -> String {
    record
        .exit_code
        .map(|c| format!("exit {c}"))
        .unwrap_or_else(|| "exit ?".to_string())
}

pub fn format_environment(env: &Environment, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(env),
        OutputFormat::Text => {
            let mut out = format!("Environment: {}\n", env.id);
            out.push_str(&format!("Workdir:     {}\n", env.workdir.display()));
            if let Some(repo) = &env.repo {
                if let Some(remote) = &repo.remote {
                    out.push_str(&format!("Remote:      {remote}\n"));
                }
                if let Some(commit) = &repo.commit {
                    out.push_str(&format!("Commit:      {}\n", short(commit)));
                }
            }
            out.push_str(&format!(
                "Created:     {}\n",
                env.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            out
        }
    }
}

pub fn format_matches(matches: &[SearchMatch], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(matches),
        OutputFormat::Text => {
            let mut out = String::new();
            for m in matches {
                let r = &m.record;
                out.push_str(&format!(
                    "{:.2}  {}  ({}, {}, {})\n",
                    m.score,
                    r.command,
                    r.cwd.display(),
                    status(r),
                    r.captured_at.format("%Y-%m-%d %H:%M")
                ));
            }
            out
        }
    }
}

pub fn format_answer(answer: &Answer, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(answer),
        OutputFormat::Text => answer.text.clone(),
    }
}

pub fn format_history(records: &[CommandRecord], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(records),
        OutputFormat::Text => {
            if records.is_empty() {
                return "No commands recorded.\n".to_string();
            }
            let mut out = String::new();
            for r in records {
                out.push_str(&format!(
                    "{:>6}  {}  {:<7}  {}\n",
                    r.seq,
                    r.captured_at.format("%Y-%m-%d %H:%M"),
                    status(r),
                    r.command
                ));
            }
            out
        }
    }
}

pub fn format_snapshot(snapshot: &CommitSnapshot, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => json(snapshot),
        OutputFormat::Text => format!(
            "[{}] {} ({} command(s), #{}-#{})\n",
            short(&snapshot.commit),
            snapshot.message,
            snapshot.record_count(),
            snapshot.first_seq,
            snapshot.last_seq
        ),
    }
}

fn short(oid: &str) -> &str {
    &oid[..7.min(oid.len())]
}
