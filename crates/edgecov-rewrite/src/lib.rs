//! Source-to-source edge coverage instrumentation for Go.
//!
//! Rewrites Go source so that every basic block entry records an edge
//! `(parent, this)` in the trace table at runtime. Block boundaries are
//! reconstructed syntactically from the tree-sitter parse: a statement
//! list is split at every control-flow terminator, and each resulting
//! span gets a counter-update call prepended. The rewrite is a set of
//! byte-offset insertions against the original text, so formatting and
//! comments survive untouched.
//!
//! The entry point is [`Rewriter::rewrite_source`], which runs the whole
//! per-file pipeline: directive extraction, parse, visit, import
//! injection, render, directive re-splice.

mod counter;
mod directives;
mod edit;
mod rewriter;
mod visitor;

pub use counter::counter_stmt;
pub use directives::{Directive, Placement, extract_directives, resplice_directives};
pub use rewriter::{RewriteOutcome, Rewriter, inject_start_listening, is_go_source, is_test_file};

use thiserror::Error;

/// Reserved alias under which rewritten files import the trace runtime.
///
/// The leading double underscore keeps it clear of anything a target tree
/// would plausibly declare.
pub const DEP_IMPORT_ALIAS: &str = "__edgecov_dep";

/// Import path of the runtime shim package the alias is bound to.
pub const DEP_IMPORT_PATH: &str = "github.com/edgecov/edgecov/dep";

/// Rewriter errors.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("tree-sitter rejected the Go grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),
    #[error("Go source failed to parse (first error near byte {offset})")]
    Parse { offset: usize },
    #[error("parser returned no tree")]
    NoTree,
}

pub type Result<T> = std::result::Result<T, RewriteError>;
