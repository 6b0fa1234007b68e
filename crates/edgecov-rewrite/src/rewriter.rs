//! Per-file rewrite pipeline: parse, visit, inject the runtime import,
//! render, re-splice directives.

use std::ffi::OsStr;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tree_sitter::{Node, Parser, Tree};

use crate::directives::{extract_directives, resplice_directives};
use crate::edit::EditSet;
use crate::visitor::Visitor;
use crate::{DEP_IMPORT_ALIAS, DEP_IMPORT_PATH, Result, RewriteError};

/// Result of rewriting one source file.
#[derive(Debug)]
pub struct RewriteOutcome {
    /// The rewritten text (identical to the input when nothing changed).
    pub text: String,
    /// Whether any counter was injected. Gates the runtime import: an
    /// unused import would not compile.
    pub changed: bool,
    /// Number of counters injected.
    pub counters: u32,
}

/// Rewrites Go sources one file at a time.
///
/// Holds the parser and the block-id generator; files are independent,
/// so callers that process a tree in parallel create one per worker.
pub struct Rewriter {
    parser: Parser,
    rng: StdRng,
}

impl Rewriter {
    pub fn new() -> Result<Self> {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic block ids, for tests.
    pub fn with_seed(seed: u64) -> Result<Self> {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Result<Self> {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_go::LANGUAGE.into())?;
        Ok(Self { parser, rng })
    }

    /// Run the whole per-file pipeline over `src`.
    pub fn rewrite_source(&mut self, src: &str) -> Result<RewriteOutcome> {
        let directives = extract_directives(src);
        let tree = parse_go(&mut self.parser, src)?;
        let root = tree.root_node();

        let mut visitor = Visitor::new(src, &mut self.rng);
        visitor.visit_file(root);
        let counters = visitor.counters;
        let mut edits = visitor.into_edits();

        if counters == 0 {
            return Ok(RewriteOutcome {
                text: src.to_string(),
                changed: false,
                counters: 0,
            });
        }

        inject_import(root, &mut edits);
        let rendered = edits.apply(src);
        let text = if directives.is_empty() {
            rendered
        } else {
            resplice_directives(&rendered, &directives)
        };
        Ok(RewriteOutcome {
            text,
            changed: true,
            counters,
        })
    }
}

/// Prepend a `StartListening` call to `func main` of a `package main`
/// source, so the coverage endpoint comes up before anything else runs.
///
/// Returns `None` when `src` is not the program entry point. Expected to
/// run after instrumentation: the injected call lands above the counters,
/// making it the first statement of `main`.
pub fn inject_start_listening(src: &str) -> Result<Option<String>> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_go::LANGUAGE.into())?;
    let tree = parse_go(&mut parser, src)?;
    let root = tree.root_node();

    if !is_main_package(root, src) {
        return Ok(None);
    }
    let Some(body) = main_func_body(root, src) else {
        return Ok(None);
    };

    let mut edits = EditSet::new();
    edits.insert(
        body.start_byte() + 1,
        format!("\n\t{DEP_IMPORT_ALIAS}.StartListening()\n"),
    );
    if !src.contains(DEP_IMPORT_ALIAS) {
        // Standalone use on an uninstrumented tree still has to compile.
        inject_import(root, &mut edits);
    }
    Ok(Some(edits.apply(src)))
}

/// Whether `path` names a Go source file.
pub fn is_go_source(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "go")
}

/// Whether `path` names a Go test file (left untouched by the rewrite).
pub fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.ends_with("_test.go"))
}

fn parse_go(parser: &mut Parser, src: &str) -> Result<Tree> {
    let tree = parser.parse(src, None).ok_or(RewriteError::NoTree)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(RewriteError::Parse {
            offset: first_error_offset(root),
        });
    }
    Ok(tree)
}

fn first_error_offset(node: Node<'_>) -> usize {
    if node.is_error() || node.is_missing() {
        return node.start_byte();
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .map(first_error_offset)
        .next()
        .unwrap_or_else(|| node.start_byte())
}

/// Bind the runtime import under the reserved alias.
///
/// Appends to the file's first import declaration when one exists,
/// otherwise adds a fresh import right after the package clause.
fn inject_import(root: Node<'_>, edits: &mut EditSet) {
    let mut package_end = None;
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "package_clause" => package_end = Some(child.end_byte()),
            "import_declaration" => {
                let mut inner = child.walk();
                let list = child
                    .named_children(&mut inner)
                    .find(|c| c.kind() == "import_spec_list");
                match list {
                    Some(list) => {
                        // Right after the opening parenthesis.
                        edits.insert(
                            list.start_byte() + 1,
                            format!("\n\t{DEP_IMPORT_ALIAS} \"{DEP_IMPORT_PATH}\""),
                        );
                    }
                    None => {
                        edits.insert(
                            child.end_byte(),
                            format!("\nimport {DEP_IMPORT_ALIAS} \"{DEP_IMPORT_PATH}\""),
                        );
                    }
                }
                return;
            }
            _ => {}
        }
    }
    edits.insert(
        package_end.unwrap_or(0),
        format!("\n\nimport {DEP_IMPORT_ALIAS} \"{DEP_IMPORT_PATH}\""),
    );
}

fn is_main_package(root: Node<'_>, src: &str) -> bool {
    let mut cursor = root.walk();
    root.named_children(&mut cursor)
        .find(|c| c.kind() == "package_clause")
        .and_then(|pkg| {
            let mut inner = pkg.walk();
            pkg.named_children(&mut inner)
                .find(|c| c.kind() == "package_identifier")
        })
        .is_some_and(|ident| &src[ident.byte_range()] == "main")
}

fn main_func_body<'t>(root: Node<'t>, src: &str) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    let main = root.named_children(&mut cursor).find(|c| {
        c.kind() == "function_declaration"
            && c.child_by_field_name("name")
                .is_some_and(|n| &src[n.byte_range()] == "main")
    })?;
    main.child_by_field_name("body")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(src: &str) -> RewriteOutcome {
        Rewriter::with_seed(7).unwrap().rewrite_source(src).unwrap()
    }

    /// The rewritten text must still be well-formed Go.
    fn assert_parses(src: &str) {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(src, None).unwrap();
        assert!(
            !tree.root_node().has_error(),
            "rewritten source no longer parses:\n{src}"
        );
    }

    fn count_counters(src: &str) -> usize {
        src.matches(".GetTraceTable().AddCount(").count()
    }

    #[test]
    fn rewrites_simple_function() {
        let out = rewrite("package test\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(1)\n}\n");
        assert!(out.changed);
        assert_eq!(out.counters, 1);
        assert_parses(&out.text);
        assert!(out.text.contains("__edgecov_dep.GetTraceTable().AddCount("));
        assert!(out.text.contains("import __edgecov_dep \"github.com/edgecov/edgecov/dep\""));
    }

    #[test]
    fn empty_function_body_gets_counter() {
        let out = rewrite("package test\n\nfunc noop() {}\n");
        assert_eq!(out.counters, 1);
        assert_parses(&out.text);
    }

    #[test]
    fn file_without_functions_is_unchanged() {
        let src = "package test\n\nconst answer = 42\n\ntype T struct{ x int }\n";
        let out = rewrite(src);
        assert!(!out.changed);
        assert_eq!(out.text, src);
        assert!(!out.text.contains("__edgecov_dep"));
    }

    #[test]
    fn init_function_is_not_instrumented() {
        let src = "package test\n\nfunc init() {\n\tregister()\n}\n";
        let out = rewrite(src);
        assert!(!out.changed);
        assert_eq!(out.text, src);
    }

    #[test]
    fn import_added_without_existing_imports() {
        let out = rewrite("package test\n\nfunc f() {\n\tg()\n}\n");
        assert!(out.text.contains("package test\n\nimport __edgecov_dep \"github.com/edgecov/edgecov/dep\""));
        assert_parses(&out.text);
    }

    #[test]
    fn import_appended_to_single_import() {
        let out = rewrite("package test\n\nimport \"fmt\"\n\nfunc f() {\n\tfmt.Println(1)\n}\n");
        assert!(out.text.contains("import \"fmt\"\nimport __edgecov_dep \"github.com/edgecov/edgecov/dep\""));
        assert_parses(&out.text);
    }

    #[test]
    fn if_else_chain_is_wrapped() {
        let out = rewrite(
            "package test\n\nfunc f(a, b bool) {\n\tif a {\n\t\tx()\n\t} else if b {\n\t\ty()\n\t}\n}\n",
        );
        assert_parses(&out.text);
        // The chained branch now sits inside a synthesized else block with
        // its own counter, plus one inside the inner if body.
        assert!(out.text.contains("} else {"));
        let else_block = out.text.split("} else {").nth(1).unwrap();
        assert!(else_block.contains("GetTraceTable().AddCount("));
        let inner_if_body = else_block.split("if b {").nth(1).unwrap();
        assert!(inner_if_body.contains("GetTraceTable().AddCount("));
    }

    #[test]
    fn switch_without_default_gains_one() {
        let out = rewrite(
            "package test\n\nfunc f(x int) {\n\tswitch x {\n\tcase 1:\n\t\ta()\n\tcase 2:\n\t\tb()\n\t}\n}\n",
        );
        assert_parses(&out.text);
        assert!(out.text.contains("default:"));
        // Every clause body carries a counter: two cases, the synthesized
        // default, and the function body itself.
        assert_eq!(count_counters(&out.text), 4);
    }

    #[test]
    fn switch_with_default_is_left_alone() {
        let out = rewrite(
            "package test\n\nfunc f(x int) {\n\tswitch x {\n\tcase 1:\n\t\ta()\n\tdefault:\n\t\tb()\n\t}\n}\n",
        );
        assert_parses(&out.text);
        assert_eq!(out.text.matches("default:").count(), 1);
    }

    #[test]
    fn empty_switch_is_skipped() {
        let out = rewrite("package test\n\nfunc f(x int) {\n\tswitch x {\n\t}\n}\n");
        assert_parses(&out.text);
        // Only the function body counter; nothing inside the switch.
        assert_eq!(count_counters(&out.text), 1);
        assert!(!out.text.contains("default:"));
    }

    #[test]
    fn select_does_not_gain_default() {
        let out = rewrite(
            "package test\n\nfunc f(ch chan int) {\n\tselect {\n\tcase v := <-ch:\n\t\tuse(v)\n\tcase ch <- 1:\n\t}\n}\n",
        );
        assert_parses(&out.text);
        assert!(!out.text.contains("default:"));
        // Function body, receive clause, empty send clause.
        assert_eq!(count_counters(&out.text), 3);
    }

    #[test]
    fn short_circuit_right_operand_is_wrapped() {
        let out = rewrite("package test\n\nfunc f(a, b bool) bool {\n\treturn a && b\n}\n");
        assert_parses(&out.text);
        assert!(out.text.contains("a && func() bool {"));
        assert!(out.text.contains("return b }()"));
    }

    #[test]
    fn nested_short_circuit_wraps_each_right_operand() {
        let out = rewrite("package test\n\nfunc f(a, b, c bool) bool {\n\treturn a || b && c\n}\n");
        assert_parses(&out.text);
        assert_eq!(out.text.matches("func() bool {").count(), 2);
    }

    #[test]
    fn func_literal_bodies_are_instrumented() {
        let out = rewrite(
            "package test\n\nvar handler = func(x int) int {\n\treturn x + 1\n}\n\nfunc f() {\n\tgo func() {\n\t\twork()\n\t}()\n}\n",
        );
        assert_parses(&out.text);
        // One in the var initializer literal, one in f, one in the goroutine.
        assert_eq!(count_counters(&out.text), 3);
    }

    #[test]
    fn statements_after_terminators_start_new_blocks() {
        let out = rewrite(
            "package test\n\nfunc f(x int) {\n\ta()\n\tif x > 0 {\n\t\tb()\n\t}\n\tc()\n}\n",
        );
        assert_parses(&out.text);
        // Span before the if, the if body, and the span after it.
        assert_eq!(count_counters(&out.text), 3);
    }

    #[test]
    fn panic_call_terminates_a_block() {
        let out = rewrite(
            "package test\n\nfunc f(x int) {\n\tif x < 0 {\n\t\tpanic(\"negative\")\n\t\tunreachable()\n\t}\n}\n",
        );
        assert_parses(&out.text);
        // Function body, if body, and the span after the panic.
        assert_eq!(count_counters(&out.text), 3);
    }

    #[test]
    fn labeled_loop_keeps_label_and_splits() {
        let out = rewrite(
            "package test\n\nfunc f() {\nLOOP:\n\tfor i := 0; i < 3; i++ {\n\t\tbreak LOOP\n\t}\n}\n",
        );
        assert_parses(&out.text);
        assert!(out.text.contains("LOOP:"));
    }

    #[test]
    fn complex_source_survives_rewrite() {
        let src = r#"
package test1

import (
	"fmt"
	"math"
)

var Function1 = func(f func(int) func(), args ...int) int {
	return len(args)
}

const Const1 = "ignored"

func Function2() func() int {
	return func() int {
		return 1
	}
}

func Function3(x int) {
	defer func() {
		fmt.Print("defer")
	}()

	if a := Function2()(); a > 0 {
		fmt.Print(1)
	}

	for j := -1; j < Function2()(); j = Function2()() & (x + 1) {
		switch b := Function1(func(int) func() { return func() {} }, 1, 3); -b {
		case Function2()():
		case -3:
			fmt.Print("case 1&2")
		case x:
			fmt.Print("case 4")
			fallthrough
		default:
			fmt.Print("default")
		}

		fmt.Print("do nothing")
	}

	var ch chan int
	select {
	case l := <-ch:
		fmt.Print(l)
		return
	case ch <- x:
	default:
		fmt.Print(1)
	}

	for {
		if x := Function2()(); float64(x) < math.Abs(func(y float64) float64 { return y }(3.0)) {
			Function1(func(i int) func() { return func() {} }, x)
		} else if true {
			fmt.Print(x)
			break
		}
		return
	}
}

func main() {
	go func() {
		Function3(1)
	}()

	defer Function3(2)
}
"#;
        let out = rewrite(src);
        assert!(out.changed);
        assert_parses(&out.text);
        assert_eq!(count_counters(&out.text) as u32, out.counters);
        // Non-injected statements survive verbatim.
        for needle in [
            "fmt.Print(\"defer\")",
            "fallthrough",
            "fmt.Print(\"do nothing\")",
            "case ch <- x:",
        ] {
            assert!(out.text.contains(needle), "lost statement: {needle}");
        }
    }

    #[test]
    fn test_helpers_classify_paths() {
        assert!(is_go_source(Path::new("kv/txn.go")));
        assert!(!is_go_source(Path::new("kv/README.md")));
        assert!(is_test_file(Path::new("kv/txn_test.go")));
        assert!(!is_test_file(Path::new("kv/txn.go")));
    }

    #[test]
    fn parse_error_is_fatal() {
        let err = Rewriter::with_seed(1)
            .unwrap()
            .rewrite_source("package test\n\nfunc broken( {\n")
            .unwrap_err();
        assert!(matches!(err, RewriteError::Parse { .. }));
    }

    #[test]
    fn start_listening_becomes_first_statement() {
        let src = "package main\n\nfunc main() {\n\tsetup()\n\trun()\n}\n";
        let instrumented = rewrite(src);
        let text = inject_start_listening(&instrumented.text).unwrap().unwrap();
        assert_parses(&text);

        let body = text.split("func main() {").nth(1).unwrap();
        let first_stmt = body.lines().find(|l| !l.trim().is_empty()).unwrap();
        assert_eq!(first_stmt.trim(), "__edgecov_dep.StartListening()");
    }

    #[test]
    fn start_listening_skips_non_main_packages() {
        assert!(inject_start_listening("package kv\n\nfunc main() {}\n")
            .unwrap()
            .is_none());
        assert!(inject_start_listening("package main\n\nfunc run() {}\n")
            .unwrap()
            .is_none());
    }

    #[test]
    fn directives_survive_the_rewrite() {
        let src = "//go:build linux\n\n//go:generate mockgen\npackage test\n\nfunc f() {\n\tg()\n}\n";
        let out = rewrite(src);
        assert_parses(&out.text);
        assert!(out.text.contains("//go:build linux"));
        assert!(out.text.contains("//go:generate mockgen"));
        // Build tags stay above the package clause.
        let build_pos = out.text.find("//go:build").unwrap();
        let pkg_pos = out.text.find("package test").unwrap();
        assert!(build_pos < pkg_pos);
    }
}
