//! The instrumentation pipeline: acquire, rewrite, inject, emit.

use std::fs;
use std::path::{Path, PathBuf};

use edgecov_rewrite::{Rewriter, inject_start_listening, is_go_source, is_test_file};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::acquire::{self, is_skipped_dir};
use crate::config::Config;
use crate::shim;
use crate::{Error, Result};

/// What the instrumentation run did.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstrumentStats {
    /// Eligible source files considered.
    pub files_seen: usize,
    /// Files that gained at least one counter and were written back.
    pub files_rewritten: usize,
    /// Total counters injected across the tree.
    pub counters: u64,
}

/// Run the whole pipeline described by `config`.
///
/// The caller is expected to have validated the config; a partially
/// rewritten target after an error is dirty and should be discarded.
pub fn run(config: &Config) -> Result<InstrumentStats> {
    acquire::acquire_sources(config)?;
    let stats = instrument_tree(&config.target_dir)?;
    inject_entry_point(&config.target_dir, config.entry.as_deref())?;
    shim::write_dep_package(&config.target_dir)?;
    info!(
        files = stats.files_rewritten,
        counters = stats.counters,
        "instrumentation complete"
    );
    Ok(stats)
}

/// Rewrite every eligible source file under `dir` in place.
///
/// Files are independent, so the tree is processed in parallel; the
/// first error aborts the run.
pub fn instrument_tree(dir: &Path) -> Result<InstrumentStats> {
    let files = collect_go_files(dir)?;
    let outcomes = files
        .par_iter()
        .map(|path| {
            let src = fs::read_to_string(path)?;
            let mut rewriter = Rewriter::new().map_err(|source| Error::Rewrite {
                path: path.clone(),
                source,
            })?;
            let out = rewriter
                .rewrite_source(&src)
                .map_err(|source| Error::Rewrite {
                    path: path.clone(),
                    source,
                })?;
            if out.changed {
                fs::write(path, &out.text)?;
                debug!(path = %path.display(), counters = out.counters, "rewrote");
            }
            Ok((out.changed, u64::from(out.counters)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut stats = InstrumentStats {
        files_seen: outcomes.len(),
        ..InstrumentStats::default()
    };
    for (changed, counters) in outcomes {
        if changed {
            stats.files_rewritten += 1;
        }
        stats.counters += counters;
    }
    Ok(stats)
}

/// Prepend the endpoint startup call to the program entry point.
///
/// With an explicit entry file the call goes there; otherwise the tree
/// is scanned for the first `package main` file with a `func main`.
pub fn inject_entry_point(dir: &Path, entry: Option<&Path>) -> Result<()> {
    if let Some(rel) = entry {
        let path = dir.join(rel);
        let src = fs::read_to_string(&path)?;
        let text = inject_start_listening(&src)
            .map_err(|source| Error::Rewrite {
                path: path.clone(),
                source,
            })?
            .ok_or_else(|| Error::NoEntryPoint(path.clone()))?;
        fs::write(&path, text)?;
        info!(path = %path.display(), "injected endpoint startup");
        return Ok(());
    }

    for path in collect_go_files(dir)? {
        let src = fs::read_to_string(&path)?;
        let injected = inject_start_listening(&src).map_err(|source| Error::Rewrite {
            path: path.clone(),
            source,
        })?;
        if let Some(text) = injected {
            fs::write(&path, text)?;
            info!(path = %path.display(), "injected endpoint startup");
            return Ok(());
        }
    }
    Err(Error::NoEntryPoint(dir.to_path_buf()))
}

/// Eligible source files under `dir`, in deterministic order.
fn collect_go_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_into(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_into(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            let skip = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_skipped_dir);
            if !skip {
                collect_into(&path, out)?;
            }
        } else if file_type.is_file() && is_go_source(&path) && !is_test_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}
