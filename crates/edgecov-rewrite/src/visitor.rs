//! The rewrite visitor: splits statement lists into basic blocks and
//! injects a counter-update call at the entry of each one.
//!
//! Blocks are identified syntactically. A statement list is scanned left
//! to right and split at every control-flow terminator (branch, loop,
//! `if`, any switch or select, a `panic` call, or a statement containing
//! a function literal). Each span gets a fresh pseudo-random block id and
//! a counter recording the edge from its predecessor: the enclosing
//! block's id for the first span, the previous span's id after that.
//!
//! The visitor only ever records insertions (see `edit.rs`); the tree is
//! never mutated, so every byte offset refers to the original source.

use edgecov_trace::BlockId;
use rand::Rng;
use rand::rngs::StdRng;
use tree_sitter::Node;

use crate::counter::counter_stmt;
use crate::edit::EditSet;

/// How a counter insertion meets the surrounding text.
#[derive(Clone, Copy)]
enum CounterStyle {
    /// Right after an opening `{` or a clause `:` (the span has no
    /// statements of its own).
    Open,
    /// Immediately before the span's first statement.
    Inline,
}

pub(crate) struct Visitor<'a> {
    src: &'a str,
    rng: &'a mut StdRng,
    edits: EditSet,
    pub counters: u32,
}

impl<'a> Visitor<'a> {
    pub fn new(src: &'a str, rng: &'a mut StdRng) -> Self {
        Self {
            src,
            rng,
            edits: EditSet::new(),
            counters: 0,
        }
    }

    pub fn into_edits(self) -> EditSet {
        self.edits
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        &self.src[node.byte_range()]
    }

    fn gen_block_id(&mut self) -> BlockId {
        self.rng.random::<BlockId>()
    }

    fn push_counter(&mut self, at: usize, style: CounterStyle, src: BlockId, dst: BlockId) {
        let stmt = counter_stmt(src, dst);
        let text = match style {
            CounterStyle::Open => format!("\n\t{stmt};"),
            CounterStyle::Inline => format!("{stmt}; "),
        };
        self.edits.insert(at, text);
        self.counters += 1;
    }

    /// Instrument every function body in the file.
    ///
    /// `init` functions are skipped (they run exactly once and would only
    /// add constant noise); of the declarations only `var` is descended,
    /// to reach function literals in initializers.
    pub fn visit_file(&mut self, root: Node<'_>) {
        let mut cursor = root.walk();
        for decl in root.named_children(&mut cursor) {
            match decl.kind() {
                "function_declaration" | "method_declaration" => {
                    let name = decl.child_by_field_name("name").map(|n| self.text(n));
                    if name == Some("init") {
                        continue;
                    }
                    if let Some(body) = decl.child_by_field_name("body") {
                        self.process_block(body, 0);
                    }
                }
                "var_declaration" => self.walk_expr(decl, 0),
                _ => {}
            }
        }
    }

    /// Split a block into counter spans, then walk its statements with
    /// the last span's id as their parent.
    fn process_block(&mut self, block: Node<'_>, parent: BlockId) {
        let stmts = self.statements_of(block);
        let last = self.add_counters(
            block.start_byte(),
            block.start_byte() + 1,
            block.end_byte(),
            &stmts,
            true,
            parent,
        );
        for stmt in &stmts {
            self.walk_stmt(*stmt, last);
        }
    }

    /// The core span-splitting loop.
    ///
    /// `cmp_pos` tracks the current span's start position; a span whose
    /// start equals its boundary (two blocks abutting) gets no counter.
    /// With `extend` set (plain blocks, not clause bodies) a span with no
    /// terminator runs to the closing brace.
    fn add_counters(
        &mut self,
        mut cmp_pos: usize,
        open_insert_at: usize,
        block_end: usize,
        stmts: &[Node<'_>],
        mut extend: bool,
        parent: BlockId,
    ) -> BlockId {
        if stmts.is_empty() {
            let id = self.gen_block_id();
            self.push_counter(open_insert_at, CounterStyle::Open, parent, id);
            return id;
        }

        let mut last_id = parent;
        let mut start = 0;
        loop {
            // Find the first control-flow terminator; it closes the span.
            let mut end = block_end;
            let mut last = start;
            while last < stmts.len() {
                end = self.statement_boundary(stmts[last]);
                last += 1;
                if self.ends_basic_block(stmts[last - 1]) {
                    extend = false;
                    break;
                }
            }
            if extend {
                end = block_end;
            }
            if cmp_pos != end {
                let id = self.gen_block_id();
                self.push_counter(
                    stmts[start].start_byte(),
                    CounterStyle::Inline,
                    last_id,
                    id,
                );
                last_id = id;
            }
            start = last;
            if start >= stmts.len() {
                break;
            }
            cmp_pos = stmts[start].start_byte();
        }
        last_id
    }

    fn walk_stmt(&mut self, node: Node<'_>, parent: BlockId) {
        match node.kind() {
            "block" => self.process_block(node, parent),
            "if_statement" => self.walk_if(node, parent),
            "for_statement" => {
                let body = node.child_by_field_name("body");
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if Some(child.id()) != body.map(|b| b.id()) && child.kind() != "comment" {
                        self.walk_expr(child, parent);
                    }
                }
                if let Some(body) = body {
                    self.process_block(body, parent);
                }
            }
            "expression_switch_statement" | "type_switch_statement" => {
                self.walk_selection(node, parent, true);
            }
            "select_statement" => self.walk_selection(node, parent, false),
            "labeled_statement" => {
                if let Some(inner) = labeled_inner(node) {
                    self.walk_stmt(inner, parent);
                }
            }
            "const_declaration" | "type_declaration" => {}
            _ => self.walk_expr(node, parent),
        }
    }

    fn walk_if(&mut self, node: Node<'_>, parent: BlockId) {
        if let Some(init) = node.child_by_field_name("initializer") {
            self.walk_expr(init, parent);
        }
        if let Some(cond) = node.child_by_field_name("condition") {
            self.walk_expr(cond, parent);
        }
        if let Some(body) = node.child_by_field_name("consequence") {
            self.process_block(body, parent);
        }
        let Some(alt) = node.child_by_field_name("alternative") else {
            return;
        };
        if alt.kind() == "if_statement" {
            // if A {} else if B {} ==> if A {} else { if B {} }, so the
            // chained branch gets a countable block of its own.
            let id = self.gen_block_id();
            self.edits.insert(
                alt.start_byte(),
                format!("{{\n\t{}; ", counter_stmt(parent, id)),
            );
            self.counters += 1;
            self.edits.insert(alt.end_byte(), "\n}".to_string());
            self.walk_if(alt, id);
        } else {
            self.process_block(alt, parent);
        }
    }

    /// Instrument a switch, type switch, or select.
    ///
    /// Clause bodies are instrumented per-clause (clauses share closing
    /// delimiters, so spans never extend past the clause). For switches
    /// without a default clause an empty one is appended so every control
    /// path contains a counter; select is exempt, a synthesized default
    /// would turn a blocking select into a non-blocking one.
    fn walk_selection(&mut self, node: Node<'_>, parent: BlockId, append_default: bool) {
        let mut cases = Vec::new();
        let mut header = Vec::new();
        {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "expression_case" | "type_case" | "communication_case" | "default_case" => {
                        cases.push(child);
                    }
                    "comment" => {}
                    _ => header.push(child),
                }
            }
        }
        if cases.is_empty() {
            // An empty selection; a counter inside it would not parse.
            return;
        }
        for child in header {
            self.walk_expr(child, parent);
        }

        let mut has_default = false;
        for case in &cases {
            if case.kind() == "default_case" {
                has_default = true;
            }
            for value in clause_header(*case) {
                self.walk_expr(value, parent);
            }
            let body = clause_body(*case);
            let open_at = colon_end(*case).unwrap_or_else(|| case.end_byte());
            self.add_counters(
                case.start_byte(),
                open_at,
                case.end_byte(),
                &body,
                false,
                parent,
            );
            for stmt in &body {
                self.walk_stmt(*stmt, parent);
            }
        }

        if append_default && !has_default {
            let id = self.gen_block_id();
            let rbrace = node.end_byte().saturating_sub(1);
            self.edits
                .insert(rbrace, format!("\ndefault:\n\t{};\n", counter_stmt(parent, id)));
            self.counters += 1;
        }
    }

    fn walk_expr(&mut self, node: Node<'_>, parent: BlockId) {
        match node.kind() {
            "func_literal" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.process_block(body, parent);
                }
            }
            "binary_expression" => {
                let op = node.child_by_field_name("operator").map(|o| self.text(o));
                if matches!(op, Some("&&" | "||")) {
                    if let Some(left) = node.child_by_field_name("left") {
                        self.walk_expr(left, parent);
                    }
                    if let Some(right) = node.child_by_field_name("right") {
                        // x || y ==> x || func() bool { return y }(), keeping
                        // short-circuit evaluation while the right operand
                        // becomes an instrumentable function body.
                        let id = self.gen_block_id();
                        self.edits.insert(
                            right.start_byte(),
                            format!("func() bool {{ {}; return ", counter_stmt(parent, id)),
                        );
                        self.counters += 1;
                        self.edits.insert(right.end_byte(), " }()".to_string());
                        self.walk_expr(right, id);
                    }
                } else {
                    self.walk_children(node, parent);
                }
            }
            _ => self.walk_children(node, parent),
        }
    }

    fn walk_children(&mut self, node: Node<'_>, parent: BlockId) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "comment" {
                self.walk_expr(child, parent);
            }
        }
    }

    /// Statement children of a block, comments excluded.
    fn statements_of<'b>(&self, block: Node<'b>) -> Vec<Node<'b>> {
        let mut cursor = block.walk();
        block
            .named_children(&mut cursor)
            .filter(|c| c.kind() != "comment")
            .collect()
    }

    /// Start position of the basic block a statement opens.
    ///
    /// A statement head (init/cond/post, range expression, switch tag)
    /// may embed a function literal; the literal's own body brace then
    /// bounds the span, since the literal has its own entry point and
    /// must not be swept into the enclosing counter.
    fn statement_boundary(&self, node: Node<'_>) -> usize {
        match node.kind() {
            "block" => node.start_byte(),
            "if_statement" => func_lit_in_field(node, "initializer")
                .or_else(|| func_lit_in_field(node, "condition"))
                .or_else(|| node.child_by_field_name("consequence").map(|b| b.start_byte()))
                .unwrap_or_else(|| node.end_byte()),
            "for_statement" => {
                let body = node.child_by_field_name("body");
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if Some(child.id()) == body.map(|b| b.id()) || child.kind() == "comment" {
                        continue;
                    }
                    if let Some(pos) = find_func_literal(child) {
                        return pos;
                    }
                }
                body.map_or_else(|| node.end_byte(), |b| b.start_byte())
            }
            "labeled_statement" => labeled_inner(node)
                .map_or_else(|| node.end_byte(), |inner| self.statement_boundary(inner)),
            "expression_switch_statement" | "type_switch_statement" => {
                func_lit_in_field(node, "initializer")
                    .or_else(|| func_lit_in_field(node, "value"))
                    .or_else(|| lbrace_offset(node))
                    .unwrap_or_else(|| node.end_byte())
            }
            "select_statement" => lbrace_offset(node).unwrap_or_else(|| node.end_byte()),
            _ => find_func_literal(node).unwrap_or_else(|| node.end_byte()),
        }
    }

    /// Whether a statement terminates the basic block it appears in.
    fn ends_basic_block(&self, node: Node<'_>) -> bool {
        match node.kind() {
            "block"
            | "if_statement"
            | "for_statement"
            | "expression_switch_statement"
            | "type_switch_statement"
            | "select_statement"
            | "break_statement"
            | "continue_statement"
            | "goto_statement"
            | "fallthrough_statement" => true,
            "labeled_statement" => {
                labeled_inner(node).is_some_and(|inner| self.ends_basic_block(inner))
            }
            "expression_statement" | "call_expression" => {
                // Calls to panic change the flow. Without type checking we
                // cannot prove the identifier is the builtin, matching the
                // usual cover-tool compromise.
                self.is_panic_call(node) || find_func_literal(node).is_some()
            }
            _ => find_func_literal(node).is_some(),
        }
    }

    fn is_panic_call(&self, stmt: Node<'_>) -> bool {
        let call = if stmt.kind() == "call_expression" {
            stmt
        } else {
            match stmt.named_child(0).filter(|c| c.kind() == "call_expression") {
                Some(call) => call,
                None => return false,
            }
        };
        let is_panic = call
            .child_by_field_name("function")
            .is_some_and(|f| f.kind() == "identifier" && self.text(f) == "panic");
        if !is_panic {
            return false;
        }
        call.child_by_field_name("arguments").is_some_and(|args| {
            let mut cursor = args.walk();
            args.named_children(&mut cursor)
                .filter(|a| a.kind() != "comment")
                .count()
                == 1
        })
    }
}

/// First function literal under `node` in source order, as the byte
/// offset of its body's opening brace.
fn find_func_literal(node: Node<'_>) -> Option<usize> {
    if node.kind() == "func_literal" {
        return node.child_by_field_name("body").map(|b| b.start_byte());
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(find_func_literal)
}

fn func_lit_in_field(node: Node<'_>, field: &str) -> Option<usize> {
    node.child_by_field_name(field).and_then(find_func_literal)
}

/// The statement a label is attached to.
fn labeled_inner(node: Node<'_>) -> Option<Node<'_>> {
    let label = node.child_by_field_name("label").map(|l| l.id());
    let mut cursor = node.walk();
    let inner = node
        .named_children(&mut cursor)
        .find(|c| Some(c.id()) != label && c.kind() != "comment");
    inner
}

/// Byte offset of a node's opening brace token.
fn lbrace_offset(node: Node<'_>) -> Option<usize> {
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .find(|c| c.kind() == "{")
        .map(|c| c.start_byte())
}

/// Offset just past a clause's `:`, where a counter lands when the
/// clause body is empty.
fn colon_end(case: Node<'_>) -> Option<usize> {
    let mut cursor = case.walk();
    let children: Vec<Node<'_>> = case.children(&mut cursor).collect();
    children.into_iter().find(|c| c.kind() == ":").map(|c| c.end_byte())
}

/// Case-value / communication operands of a clause (the part before `:`).
fn clause_header(case: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut cursor = case.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if child.is_named() && cursor.field_name().is_some() {
                out.push(child);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    out
}

/// Body statements of a clause (everything after `:`, comments excluded).
fn clause_body(case: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut cursor = case.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if child.is_named() && cursor.field_name().is_none() && child.kind() != "comment" {
                out.push(child);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    out
}
