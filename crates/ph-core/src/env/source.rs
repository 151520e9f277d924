use std::path::PathBuf;

/// Where `ph --env` loads an environment from.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvSource {
    Local(PathBuf),
    Git(String),
}

const GIT_SCHEMES: &[&str] = &["http://", "https://", "ssh://", "git://", "file://"];

impl EnvSource {
    /// Classify a user-supplied source. URLs, scp-style `user@host:path`
    /// references and paths ending in `.git` are git references; anything
    /// else is a local directory.
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        let is_git = GIT_SCHEMES.iter().any(|s| source.starts_with(s))
            || is_scp_like(source)
            || source.trim_end_matches('/').ends_with(".git");
        if is_git {
            Self::Git(source.to_string())
        } else {
            Self::Local(PathBuf::from(source))
        }
    }
}

fn is_scp_like(source: &str) -> bool {
    let Some(colon) = source.find(':') else {
        return false;
    };
    let host = &source[..colon];
    host.contains('@') && !host.contains('/')
}
