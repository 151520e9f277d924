use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Name of the hidden file marking a directory's group.
pub const GROUP_FILE: &str = ".ph-group";

/// A directory-scoped group marker. Independent of environments.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTag {
    pub dir: PathBuf,
    pub name: String,
}

/// Tag `dir` with `name`, replacing any previous tag.
pub fn write(dir: &Path, name: &str) -> Result<GroupTag, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("group name is empty".into()));
    }
    if name.contains('\n') {
        return Err(CoreError::Validation("group name must be a single line".into()));
    }
    fs::write(dir.join(GROUP_FILE), format!("{name}\n"))?;
    tracing::debug!(dir = %dir.display(), group = name, "wrote group tag");
    Ok(GroupTag {
        dir: dir.to_path_buf(),
        name: name.to_string(),
    })
}

/// Read the tag of `dir`, if it has one.
pub fn read(dir: &Path) -> Option<GroupTag> {
    let content = fs::read_to_string(dir.join(GROUP_FILE)).ok()?;
    let name = content.trim();
    if name.is_empty() {
        return None;
    }
    Some(GroupTag {
        dir: dir.to_path_buf(),
        name: name.to_string(),
    })
}
