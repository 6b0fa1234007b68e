//! Source-tree acquisition: local copy or shallow remote clone.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::config::Config;
use crate::{Error, Result};

/// Subtrees never copied into the work directory.
const SKIPPED_DIRS: &[&str] = &[".git", ".idea", ".vscode"];

pub(crate) fn is_skipped_dir(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

/// Materialize the source tree at the target directory.
pub fn acquire_sources(config: &Config) -> Result<()> {
    if config.from_remote {
        clone_remote(&config.remote_url, &config.target_dir)
    } else {
        let src = config.src_dir.as_ref().ok_or(Error::MissingSource)?;
        info!(src = %src.display(), target = %config.target_dir.display(), "copying source tree");
        copy_tree(src, &config.target_dir)
    }
}

fn clone_remote(url: &str, target: &Path) -> Result<()> {
    info!(url, target = %target.display(), "cloning remote repository");
    let status = Command::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(target)
        .status()?;
    if !status.success() {
        return Err(Error::CloneFailed {
            url: url.to_string(),
            status,
        });
    }
    // The clone's own metadata is of no use to the build.
    let git_dir = target.join(".git");
    if git_dir.exists() {
        fs::remove_dir_all(git_dir)?;
    }
    Ok(())
}

/// Copy `src` into `dst` recursively, skipping VCS and editor subtrees.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let to = dst.join(&name);
        if file_type.is_dir() {
            if name.to_str().is_some_and(is_skipped_dir) {
                continue;
            }
            copy_tree(&entry.path(), &to)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &to)?;
        }
        // Symlinks are dropped: the trees this targets do not rely on
        // them, and a dangling link would fail the copy.
    }
    Ok(())
}
