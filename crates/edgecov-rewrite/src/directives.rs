//! Preservation of toolchain directive comments across the rewrite.
//!
//! Go build constraints (`//go:build`, `// +build`), code generation
//! lines (`//go:generate`) and pragma comments whose meaning depends on
//! adjacency to a declaration (`//go:linkname` and friends) must survive
//! instrumentation verbatim. They are collected from the raw text before
//! the rewrite and re-spliced afterwards; a directive already present in
//! the output is left alone, so the pass is a no-op when the renderer
//! kept it in place.

use tracing::warn;

/// Where a preserved directive belongs in the rewritten file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// File-global: re-prepended at the top of the file.
    Head,
    /// Pragma tied to the declaration it precedes: re-inserted
    /// immediately before the verbatim anchor line.
    BeforeAnchor(String),
}

/// A directive comment lifted from the original source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub text: String,
    pub placement: Placement,
}

/// Directive prefixes that are position-independent within the file head.
const HEAD_PREFIXES: &[&str] = &["//go:build", "// +build", "//go:generate"];

/// Pragmas whose identity depends on the line that follows them.
const POSITIONAL_PREFIXES: &[&str] = &[
    "//go:linkname",
    "//go:noinline",
    "//go:nosplit",
    "//go:noescape",
    "//go:norace",
    "//go:uintptrescapes",
];

fn matches_prefix(line: &str, prefixes: &[&str]) -> bool {
    let trimmed = line.trim_start();
    prefixes.iter().any(|p| {
        trimmed
            .strip_prefix(p)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t'))
    })
}

/// Collect every directive comment in `src`, classified by placement.
///
/// A positional pragma anchors to the next non-blank line; a pragma with
/// no following line degrades to head placement.
pub fn extract_directives(src: &str) -> Vec<Directive> {
    let lines: Vec<&str> = src.lines().collect();
    let mut out = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if matches_prefix(line, HEAD_PREFIXES) {
            out.push(Directive {
                text: (*line).to_string(),
                placement: Placement::Head,
            });
        } else if matches_prefix(line, POSITIONAL_PREFIXES) {
            let anchor = lines[i + 1..]
                .iter()
                .find(|l| !l.trim().is_empty())
                .map(|l| (*l).to_string());
            out.push(Directive {
                text: (*line).to_string(),
                placement: anchor.map_or(Placement::Head, Placement::BeforeAnchor),
            });
        }
    }
    out
}

/// Splice preserved directives back into rendered output.
///
/// Head directives are prepended in their original order; positional ones
/// are inserted immediately before their anchor line. A positional
/// directive whose anchor no longer exists is dropped and reported:
/// guessing a placement could silently change what symbol a pragma binds
/// to.
pub fn resplice_directives(rendered: &str, directives: &[Directive]) -> String {
    let mut lines: Vec<String> = rendered.lines().map(str::to_string).collect();
    let mut head: Vec<String> = Vec::new();

    for directive in directives {
        if lines.iter().any(|l| l == &directive.text) {
            continue;
        }
        match &directive.placement {
            Placement::Head => head.push(directive.text.clone()),
            Placement::BeforeAnchor(anchor) => {
                if let Some(idx) = lines.iter().position(|l| l == anchor) {
                    lines.insert(idx, directive.text.clone());
                } else {
                    warn!(directive = %directive.text, "anchor line not found; directive dropped");
                }
            }
        }
    }

    let mut out = String::new();
    for line in &head {
        out.push_str(line);
        out.push('\n');
    }
    if !head.is_empty() {
        // Build constraints need a blank line before the package clause.
        out.push('\n');
    }
    for line in &lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "\
//go:build linux
// +build linux

//go:generate stringer -type=Kind
package kv

//go:linkname fastrand runtime.fastrand
func fastrand() uint32

func Get() int { return 1 }
";

    #[test]
    fn extracts_and_classifies() {
        let directives = extract_directives(SRC);
        assert_eq!(directives.len(), 4);
        assert_eq!(directives[0].text, "//go:build linux");
        assert_eq!(directives[0].placement, Placement::Head);
        assert_eq!(directives[1].placement, Placement::Head);
        assert_eq!(directives[2].placement, Placement::Head);
        assert_eq!(
            directives[3].placement,
            Placement::BeforeAnchor("func fastrand() uint32".to_string())
        );
    }

    #[test]
    fn does_not_match_plain_comments() {
        let directives = extract_directives("// +building is not a constraint\n//go:buildx\npackage p\n");
        assert!(directives.is_empty());
    }

    #[test]
    fn resplices_stripped_directives() {
        let directives = extract_directives(SRC);
        // Simulate a renderer that dropped every comment.
        let stripped = "\
package kv

func fastrand() uint32

func Get() int { return 1 }
";
        let out = resplice_directives(stripped, &directives);
        assert!(out.starts_with("//go:build linux\n// +build linux\n//go:generate stringer -type=Kind\n\npackage kv\n"));
        assert!(out.contains("//go:linkname fastrand runtime.fastrand\nfunc fastrand() uint32\n"));
    }

    #[test]
    fn resplice_is_idempotent_on_intact_output() {
        let directives = extract_directives(SRC);
        let out = resplice_directives(SRC, &directives);
        assert_eq!(out, SRC);
    }

    #[test]
    fn missing_anchor_drops_directive() {
        let directives = vec![Directive {
            text: "//go:linkname gone runtime.gone".to_string(),
            placement: Placement::BeforeAnchor("func gone()".to_string()),
        }];
        let out = resplice_directives("package p\n", &directives);
        assert!(!out.contains("linkname"));
    }
}
