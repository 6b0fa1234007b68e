//! Builder configuration.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Repository cloned when remote acquisition is selected.
pub const DEFAULT_REMOTE_URL: &str = "https://github.com/pingcap/tidb";

/// Default location for the instrumented tree.
pub const DEFAULT_TARGET_DIR: &str = "/tmp/edgecov-build";

/// Builder configuration, validated before any write happens.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local source tree; ignored when `from_remote` is set.
    pub src_dir: Option<PathBuf>,
    /// Clone `remote_url` instead of copying a local tree.
    pub from_remote: bool,
    /// Repository URL used with `from_remote`.
    pub remote_url: String,
    /// Where the instrumented copy is written; must not exist yet.
    pub target_dir: PathBuf,
    /// Entry-point source relative to the target root. Auto-detected
    /// when unset.
    pub entry: Option<PathBuf>,
}

impl Config {
    /// Configuration for instrumenting a local tree.
    pub fn local(src_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            src_dir: Some(src_dir.into()),
            from_remote: false,
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            target_dir: target_dir.into(),
            entry: None,
        }
    }

    /// Reject impossible configurations before anything is written.
    pub fn validate(&self) -> Result<()> {
        match (&self.src_dir, self.from_remote) {
            (None, false) => return Err(Error::MissingSource),
            (Some(src), false) if !src.is_dir() => {
                return Err(Error::SourceMissing(src.clone()));
            }
            _ => {}
        }
        if self.target_dir.exists() {
            return Err(Error::TargetExists(self.target_dir.clone()));
        }
        Ok(())
    }

    /// Effective source root once acquisition has run.
    pub fn target(&self) -> &Path {
        &self.target_dir
    }
}
