//! Python definition extractor built on Tree-sitter 0.25.x.
//!
//! Notes:
//!   - Broad queries only (no fragile field predicates).
//!   - Methods are plain functions here; the enclosing class lists
//!     them as members, including decorated ones.
//!   - Decorated definitions start at their first decorator.

use anyhow::{Context, Result, anyhow};
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::core::definitions::{Definition, DefinitionExtractor, DefinitionKind};

pub struct PythonDefinitions {
    language: Language,
    query: Query,
}

impl PythonDefinitions {
    pub fn new() -> Result<Self> {
        let language = tree_sitter_python::LANGUAGE.into();

        let query_src = r#"
            (function_definition
              name: (identifier) @name) @item

            (class_definition
              name: (identifier) @name) @item
        "#;

        let query = Query::new(&language, query_src).context("create Python query")?;

        Ok(Self { language, query })
    }
}

impl DefinitionExtractor for PythonDefinitions {
    fn definitions(&self, content: &str) -> Result<Vec<Definition>> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .context("set Python language")?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| anyhow!("Failed to parse Python source"))?;

        // Same byte slice for every utf8_text call
        let bytes = content.as_bytes();

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.query, tree.root_node(), bytes);
        let cap_names: Vec<&str> = self.query.capture_names().to_vec();

        let mut out = Vec::with_capacity(16);

        while let Some(m) = matches.next() {
            let mut picked: Option<Node> = None;
            let mut name_text: Option<String> = None;

            for cap in m.captures {
                match cap_names[cap.index as usize] {
                    "item" => picked = Some(cap.node),
                    "name" => name_text = cap.node.utf8_text(bytes).ok().map(str::to_string),
                    _ => {}
                }
            }

            let Some(node) = picked else { continue };
            let Some(name) = name_text else { continue };

            let (kind, members) = match node.kind() {
                "function_definition" => (DefinitionKind::Function, Vec::new()),
                "class_definition" => (DefinitionKind::Class, class_members(node, bytes)),
                _ => continue,
            };

            // A decorated definition's span includes its decorators
            let outer = match node.parent() {
                Some(p) if p.kind() == "decorated_definition" => p,
                _ => node,
            };

            out.push(Definition {
                name,
                kind,
                start_line: outer.start_position().row + 1,
                end_line: outer.end_position().row + 1,
                members,
            });
        }

        Ok(out)
    }

    fn language(&self) -> &'static str {
        "python"
    }
}

/// Names of methods and class-level assignments directly in the class body
fn class_members(node: Node, bytes: &[u8]) -> Vec<String> {
    let Some(body) = node.child_by_field_name("body") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for i in 0..body.named_child_count() {
        let Some(stmt) = body.named_child(i) else {
            continue;
        };

        let def = match stmt.kind() {
            "decorated_definition" => stmt.child_by_field_name("definition"),
            "function_definition" => Some(stmt),
            "expression_statement" => {
                // `count = 0` at class level
                if let Some(target) = stmt
                    .named_child(0)
                    .filter(|a| a.kind() == "assignment")
                    .and_then(|a| a.child_by_field_name("left"))
                    .filter(|l| l.kind() == "identifier")
                    .and_then(|l| l.utf8_text(bytes).ok())
                {
                    out.push(target.to_string());
                }
                None
            }
            _ => None,
        };

        if let Some(name) = def
            .filter(|d| d.kind() == "function_definition")
            .and_then(|d| d.child_by_field_name("name"))
            .and_then(|n| n.utf8_text(bytes).ok())
        {
            out.push(name.to_string());
        }
    }
    out
}
