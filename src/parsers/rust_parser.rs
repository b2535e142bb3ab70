//! Rust definition extractor built on Tree-sitter 0.25.x.
//!
//! Free functions and methods are reported as functions; structs, enums
//! and traits as classes. Members of a type are its fields or variants
//! plus the methods of every `impl` block targeting that type name.

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::core::definitions::{Definition, DefinitionExtractor, DefinitionKind};

pub struct RustDefinitions {
    language: Language,
    // Captures item nodes only; names are read from the `name`/`type` field.
    query: Query,
}

impl RustDefinitions {
    pub fn new() -> Result<Self> {
        let language = tree_sitter_rust::LANGUAGE.into();

        let query_src = r#"
            (function_item) @function
            (struct_item)   @class
            (enum_item)     @class
            (trait_item)    @class
            (impl_item)     @impl
        "#;

        let query = Query::new(&language, query_src).context("create Rust definitions query")?;
        Ok(Self { language, query })
    }
}

impl DefinitionExtractor for RustDefinitions {
    fn definitions(&self, content: &str) -> Result<Vec<Definition>> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| anyhow!("Failed to parse Rust source"))?;
        let bytes = content.as_bytes();

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.query, tree.root_node(), bytes);
        let cap_names: Vec<&str> = self.query.capture_names().to_vec();

        let mut out = Vec::new();
        // type name -> methods found in impl blocks
        let mut impl_methods: IndexMap<String, Vec<String>> = IndexMap::new();

        while let Some(m) = matches.next() {
            for cap in m.captures {
                let node = cap.node;
                match cap_names[cap.index as usize] {
                    "function" => {
                        if let Some(name) = field_text(node, "name", bytes) {
                            out.push(span_of(node, name, DefinitionKind::Function, Vec::new()));
                        }
                    }
                    "class" => {
                        if let Some(name) = field_text(node, "name", bytes) {
                            let members = body_members(node, bytes);
                            out.push(span_of(node, name, DefinitionKind::Class, members));
                        }
                    }
                    "impl" => {
                        let Some(owner) = impl_owner(node, bytes) else {
                            continue;
                        };
                        impl_methods
                            .entry(owner)
                            .or_default()
                            .extend(body_members(node, bytes));
                    }
                    _ => {}
                }
            }
        }

        for def in out.iter_mut().filter(|d| d.kind == DefinitionKind::Class) {
            if let Some(methods) = impl_methods.get(&def.name) {
                for m in methods {
                    if !def.members.contains(m) {
                        def.members.push(m.clone());
                    }
                }
            }
        }

        Ok(out)
    }

    fn language(&self) -> &'static str {
        "rust"
    }
}

fn span_of(node: Node, name: String, kind: DefinitionKind, members: Vec<String>) -> Definition {
    Definition {
        name,
        kind,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        members,
    }
}

fn field_text(node: Node, field: &str, bytes: &[u8]) -> Option<String> {
    node.child_by_field_name(field)?
        .utf8_text(bytes)
        .ok()
        .map(str::to_string)
}

/// `impl Foo`, `impl<T> Foo<T>`, `impl Trait for a::Foo` all yield "Foo"
fn impl_owner(node: Node, bytes: &[u8]) -> Option<String> {
    let ty = node.child_by_field_name("type")?;
    let text = ty.utf8_text(bytes).ok()?;
    let base = text.split('<').next()?;
    let last = base.rsplit("::").next()?.trim();
    (!last.is_empty()).then(|| last.to_string())
}

/// Field, variant, and method names declared in an item's body
fn body_members(node: Node, bytes: &[u8]) -> Vec<String> {
    let Some(body) = node.child_by_field_name("body") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for i in 0..body.named_child_count() {
        let Some(child) = body.named_child(i) else {
            continue;
        };
        if !matches!(
            child.kind(),
            "field_declaration" | "enum_variant" | "function_item" | "function_signature_item"
        ) {
            continue;
        }
        if let Some(name) = field_text(child, "name", bytes) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(defs: &'a [Definition], name: &str) -> &'a Definition {
        defs.iter()
            .find(|d| d.name == name)
            .expect("definition not found")
    }

    #[test]
    fn functions_and_methods_have_spans() -> Result<()> {
        let ex = RustDefinitions::new()?;
        let src = "fn helper() {}\n\nstruct Cart {\n    items: Vec<u32>,\n}\n\nimpl Cart {\n    fn total(&self) -> u32 {\n        self.items.iter().sum()\n    }\n}\n";
        let defs = ex.definitions(src)?;

        let helper = find(&defs, "helper");
        assert_eq!(helper.kind, DefinitionKind::Function);
        assert_eq!((helper.start_line, helper.end_line), (1, 1));

        let total = find(&defs, "total");
        assert_eq!(total.kind, DefinitionKind::Function);
        assert_eq!((total.start_line, total.end_line), (8, 10));
        Ok(())
    }

    #[test]
    fn struct_members_include_impl_methods() -> Result<()> {
        let ex = RustDefinitions::new()?;
        let src = r#"
pub struct Cart {
    items: Vec<u32>,
    owner: String,
}

impl<T> Default for Cart {
    fn default() -> Self { todo!() }
}

impl Cart {
    pub fn checkout(&mut self) {}
}

enum State { Open, Closed }
"#;
        let defs = ex.definitions(src)?;

        let cart = find(&defs, "Cart");
        assert_eq!(cart.kind, DefinitionKind::Class);
        assert_eq!(cart.members, vec!["items", "owner", "default", "checkout"]);

        let state = find(&defs, "State");
        assert_eq!(state.members, vec!["Open", "Closed"]);
        Ok(())
    }
}
