//! File-level dependency graph from static import statements.
//!
//! Import parsing is regex-per-line, keyed by file extension. Import
//! sources are resolved to project files where possible (relative paths,
//! Rust `mod`/`crate::` paths, dotted module names by path suffix).
//! Cycles are found with a DFS carrying an explicit recursion stack.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::infra::io::read_bounded;
use crate::infra::paths::ResolvedPath;

/// One parsed import statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStatement
{
    /// 1-based line of the statement
    pub line: usize,

    /// Module specifier as written ("./db", "os.path", "crate::store")
    pub source: String,

    /// Imported names, empty for whole-module imports
    pub symbols: Vec<String>,
}

/// Directed import edge between two project files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEdge
{
    pub from: PathBuf,
    pub to: PathBuf,
    pub line: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct DependencyGraph
{
    /// Root-relative file nodes, sorted
    pub files: Vec<PathBuf>,
    pub edges: Vec<ImportEdge>,
    /// Each cycle lists its files in import order, starting at the smallest path
    pub cycles: Vec<Vec<PathBuf>>,
    #[serde(skip)]
    graph: DiGraph<PathBuf, usize>,
    #[serde(skip)]
    index: HashMap<PathBuf, NodeIndex>,
}

impl DependencyGraph
{
    /// Files `file` imports
    pub fn dependencies_of(
        &self,
        file: &Path,
    ) -> Vec<&Path>
    {
        let Some(&node) = self
            .index
            .get(file)
        else
        {
            return Vec::new();
        };
        let mut out: Vec<&Path> = self
            .graph
            .edges(node)
            .map(|e| self.graph[e.target()].as_path())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Files importing `file`
    pub fn dependents_of(
        &self,
        file: &Path,
    ) -> Vec<&Path>
    {
        let mut out: Vec<&Path> = self
            .edges
            .iter()
            .filter(|e| e.to == file)
            .map(|e| e.from.as_path())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn has_cycles(&self) -> bool
    {
        !self
            .cycles
            .is_empty()
    }
}

/// Per-language import regexes
struct ImportPatterns
{
    js_from: Regex,
    js_bare: Regex,
    js_require: Regex,
    js_export_from: Regex,
    py_from: Regex,
    py_import: Regex,
    rust_use: Regex,
    rust_mod: Regex,
    jvm_import: Regex,
    go_single: Regex,
    go_block_entry: Regex,
    c_include: Regex,
    cs_using: Regex,
    ruby_require: Regex,
    php_use: Regex,
    php_require: Regex,
}

impl ImportPatterns
{
    fn new() -> Result<Self>
    {
        Ok(Self {
            js_from: Regex::new(r#"^\s*import\s+(?:type\s+)?(.+?)\s+from\s+['"]([^'"]+)['"]"#)?,
            js_bare: Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]"#)?,
            js_require: Regex::new(
                r#"(?:(?:const|let|var)\s+(\{[^}]*\}|[A-Za-z_$][\w$]*)\s*=\s*)?require\(\s*['"]([^'"]+)['"]\s*\)"#,
            )?,
            js_export_from: Regex::new(r#"^\s*export\s+(\*|\{[^}]*\})\s+from\s+['"]([^'"]+)['"]"#)?,
            py_from: Regex::new(r"^\s*from\s+([.\w]+)\s+import\s+(.+)$")?,
            py_import: Regex::new(r"^\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)\s*$")?,
            rust_use: Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([\w:]+?)(?:::\{([^}]*)\}|::\*)?\s*;")?,
            rust_mod: Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;")?,
            jvm_import: Regex::new(r"^\s*import\s+(?:static\s+)?([\w.]+?)(\.\*)?\s*;?\s*$")?,
            go_single: Regex::new(r#"^\s*import\s+(?:[\w.]+\s+)?"([^"]+)""#)?,
            go_block_entry: Regex::new(r#"^\s*(?:[\w.]+\s+)?"([^"]+)""#)?,
            c_include: Regex::new(r#"^\s*#\s*include\s*[<"]([^>"]+)[>"]"#)?,
            cs_using: Regex::new(r"^\s*using\s+(?:static\s+)?([\w.]+)\s*;")?,
            ruby_require: Regex::new(r#"^\s*require(?:_relative)?\s*\(?\s*['"]([^'"]+)['"]"#)?,
            php_use: Regex::new(r"^\s*use\s+([\w\\]+)(?:\s+as\s+\w+)?\s*;")?,
            php_require: Regex::new(r#"(?:require|include)(?:_once)?\s*\(?\s*['"]([^'"]+)['"]"#)?,
        })
    }
}

/// Split `{ a, b as c }`, `X`, `* as ns`, `X, { y }` into imported names
fn js_symbols(clause: &str) -> Vec<String>
{
    clause
        .split([',', '{', '}'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // `b as c` binds c; `* as ns` binds ns
            s.rsplit(" as ")
                .next()
                .unwrap_or(s)
                .trim()
                .to_string()
        })
        .filter(|s| s != "*" && s != "type")
        .collect()
}

fn comma_names(list: &str) -> Vec<String>
{
    list.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|s| {
            s.split(" as ")
                .next()
                .unwrap_or(s)
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty() && s != "\\")
        .collect()
}

fn last_segment(
    path: &str,
    sep: &str,
) -> String
{
    path.rsplit(sep)
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Normalize `a/./b/../c` without touching the filesystem
fn normalize(path: &Path) -> Option<PathBuf>
{
    let mut out = PathBuf::new();
    for comp in path.components()
    {
        match comp
        {
            Component::CurDir => {}
            Component::ParentDir =>
            {
                if !out.pop()
                {
                    return None;
                }
            }
            Component::Normal(s) => out.push(s),
            _ => return None,
        }
    }
    Some(out)
}

const JS_EXTENSIONS: [&str; 6] = ["js", "jsx", "ts", "tsx", "mjs", "cjs"];

pub struct DependencyAnalyzer
{
    patterns: ImportPatterns,
    max_file_size: u64,
}

impl DependencyAnalyzer
{
    pub fn new(max_file_size: u64) -> Result<Self>
    {
        Ok(Self {
            patterns: ImportPatterns::new()?,
            max_file_size,
        })
    }

    /// Parse the import statements of `content`, dialect chosen by extension
    pub fn parse_imports(
        &self,
        path: &Path,
        content: &str,
    ) -> Vec<ImportStatement>
    {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let p = &self.patterns;

        let mut out = Vec::new();
        let mut in_go_block = false;

        for (idx, line) in content
            .lines()
            .enumerate()
        {
            let line_no = idx + 1;
            let mut push = |source: &str, symbols: Vec<String>| {
                out.push(ImportStatement {
                    line: line_no,
                    source: source.to_string(),
                    symbols,
                });
            };

            match ext.as_str()
            {
                "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" =>
                {
                    if let Some(c) = p
                        .js_from
                        .captures(line)
                    {
                        push(&c[2], js_symbols(&c[1]));
                    }
                    else if let Some(c) = p
                        .js_export_from
                        .captures(line)
                    {
                        push(&c[2], js_symbols(&c[1]));
                    }
                    else if let Some(c) = p
                        .js_bare
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                    else
                    {
                        for c in p
                            .js_require
                            .captures_iter(line)
                        {
                            let symbols = c
                                .get(1)
                                .map(|m| js_symbols(m.as_str()))
                                .unwrap_or_default();
                            push(&c[2], symbols);
                        }
                    }
                }
                "py" | "pyi" =>
                {
                    if let Some(c) = p
                        .py_from
                        .captures(line)
                    {
                        push(&c[1], comma_names(&c[2]));
                    }
                    else if let Some(c) = p
                        .py_import
                        .captures(line)
                    {
                        for module in comma_names(&c[1])
                        {
                            push(&module, Vec::new());
                        }
                    }
                }
                "rs" =>
                {
                    if let Some(c) = p
                        .rust_mod
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                    else if let Some(c) = p
                        .rust_use
                        .captures(line)
                    {
                        let symbols = match c.get(2)
                        {
                            Some(group) => comma_names(group.as_str()),
                            None => vec![last_segment(&c[1], "::")],
                        };
                        push(&c[1], symbols);
                    }
                }
                "java" | "kt" | "kts" | "scala" | "groovy" =>
                {
                    if let Some(c) = p
                        .jvm_import
                        .captures(line)
                    {
                        let symbols = if c
                            .get(2)
                            .is_some()
                        {
                            Vec::new()
                        }
                        else
                        {
                            vec![last_segment(&c[1], ".")]
                        };
                        push(&c[1], symbols);
                    }
                }
                "go" =>
                {
                    let trimmed = line.trim();
                    if in_go_block
                    {
                        if trimmed.starts_with(')')
                        {
                            in_go_block = false;
                        }
                        else if let Some(c) = p
                            .go_block_entry
                            .captures(line)
                        {
                            push(&c[1], Vec::new());
                        }
                    }
                    else if trimmed.starts_with("import (")
                    {
                        in_go_block = true;
                    }
                    else if let Some(c) = p
                        .go_single
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                }
                "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "m" =>
                {
                    if let Some(c) = p
                        .c_include
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                }
                "cs" =>
                {
                    if let Some(c) = p
                        .cs_using
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                }
                "rb" =>
                {
                    if let Some(c) = p
                        .ruby_require
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                }
                "php" =>
                {
                    if let Some(c) = p
                        .php_use
                        .captures(line)
                    {
                        push(&c[1], vec![last_segment(&c[1], "\\")]);
                    }
                    else if let Some(c) = p
                        .php_require
                        .captures(line)
                    {
                        push(&c[1], Vec::new());
                    }
                }
                _ => {}
            }
        }

        out
    }

    /// Imports of a single file, without building the graph
    pub fn map_file_relationships(
        &self,
        file: &ResolvedPath,
    ) -> Result<Vec<ImportStatement>>
    {
        let content = read_bounded(&file.absolute, self.max_file_size)?;
        Ok(self.parse_imports(&file.relative, content.as_ref()))
    }

    /// Build the project graph over `files`: parse imports in parallel,
    /// resolve specifiers to files, then detect cycles. Resolution runs
    /// sequentially in path order, so the graph does not depend on the
    /// order of `files` or on parse scheduling.
    #[instrument(level = "debug", skip_all, fields(files = files.len()))]
    pub fn build_graph(
        &self,
        files: &[ResolvedPath],
    ) -> DependencyGraph
    {
        let mut parsed: Vec<(PathBuf, Vec<ImportStatement>)> = files
            .par_iter()
            .filter_map(|f| {
                match self.map_file_relationships(f)
                {
                    Ok(imports) => Some((f.relative.clone(), imports)),
                    Err(e) =>
                    {
                        debug!(file = %f.relative.display(), error = %e, "skipping file in dependency scan");
                        None
                    }
                }
            })
            .collect();
        parsed.sort_by(|a, b| a.0.cmp(&b.0));
        parsed.dedup_by(|a, b| a.0 == b.0);

        let mut graph = DependencyGraph::default();
        let mut sorted: Vec<PathBuf> = files
            .iter()
            .map(|f| {
                f.relative
                    .clone()
            })
            .collect();
        sorted.sort();
        sorted.dedup();

        for file in &sorted
        {
            let node = graph
                .graph
                .add_node(file.clone());
            graph
                .index
                .insert(file.clone(), node);
        }
        graph.files = sorted;

        let resolver = Resolver::new(&graph.files);
        let mut seen: BTreeSet<(PathBuf, PathBuf)> = BTreeSet::new();
        for (from, imports) in &parsed
        {
            for import in imports
            {
                let Some(to) = resolver.resolve(from, &import.source)
                else
                {
                    continue;
                };
                if &to == from || !seen.insert((from.clone(), to.clone()))
                {
                    continue;
                }
                if let (Some(&a), Some(&b)) = (graph.index.get(from), graph.index.get(&to))
                {
                    graph
                        .graph
                        .add_edge(a, b, import.line);
                    graph
                        .edges
                        .push(ImportEdge {
                            from: from.clone(),
                            to,
                            line: import.line,
                        });
                }
            }
        }
        graph
            .edges
            .sort_by(|a, b| {
                (&a.from, &a.to).cmp(&(&b.from, &b.to))
            });

        graph.cycles = find_cycles(&graph.graph);
        if graph.has_cycles()
        {
            warn!(cycles = graph.cycles.len(), "circular imports detected");
        }
        debug!(edges = graph.edges.len(), "dependency graph built");

        graph
    }
}

/// Maps import specifiers onto known project files
struct Resolver<'a>
{
    files: BTreeSet<&'a Path>,
    /// extensionless relative path ("src/db") -> files
    stems: BTreeMap<String, Vec<&'a Path>>,
}

impl<'a> Resolver<'a>
{
    fn new(files: &'a [PathBuf]) -> Self
    {
        let mut stems: BTreeMap<String, Vec<&'a Path>> = BTreeMap::new();
        for f in files
        {
            let stem = f
                .with_extension("")
                .to_string_lossy()
                .replace('\\', "/");
            stems
                .entry(stem)
                .or_default()
                .push(f.as_path());
        }
        Self {
            files: files
                .iter()
                .map(PathBuf::as_path)
                .collect(),
            stems,
        }
    }

    fn exact(
        &self,
        candidate: &Path,
    ) -> Option<PathBuf>
    {
        self.files
            .contains(candidate)
            .then(|| candidate.to_path_buf())
    }

    fn by_stem(
        &self,
        stem: &str,
    ) -> Option<PathBuf>
    {
        self.stems
            .get(stem)
            .and_then(|v| v.first())
            .map(|p| p.to_path_buf())
    }

    /// Suffix match on the extensionless path ("acme/Cart" matches "src/acme/Cart.java")
    fn by_suffix(
        &self,
        suffix: &str,
    ) -> Option<PathBuf>
    {
        let tail = format!("/{suffix}");
        self.stems
            .iter()
            .find(|(stem, _)| stem.as_str() == suffix || stem.ends_with(&tail))
            .and_then(|(_, v)| v.first())
            .map(|p| p.to_path_buf())
    }

    fn resolve(
        &self,
        from: &Path,
        source: &str,
    ) -> Option<PathBuf>
    {
        let dir = from
            .parent()
            .unwrap_or(Path::new(""));
        let ext = from
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext
        {
            "rs" => self.resolve_rust(from, dir, source),
            "py" | "pyi" => self.resolve_python(dir, source),
            _ if source.starts_with('.') =>
            {
                // Relative specifier: ./db, ../lib/util.js, ./pkg (index file)
                let base = normalize(&dir.join(source))?;
                self.exact(&base)
                    .or_else(|| self.by_stem(&base.to_string_lossy()))
                    .or_else(|| {
                        JS_EXTENSIONS
                            .iter()
                            .find_map(|e| self.exact(&base.join(format!("index.{e}"))))
                    })
            }
            "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "m" =>
            {
                normalize(&dir.join(source))
                    .and_then(|p| self.exact(&p))
                    .or_else(|| self.exact(Path::new(source)))
                    .or_else(|| self.by_suffix(&source.rsplit_once('.').map_or(source, |(s, _)| s).to_string()))
            }
            _ =>
            {
                // Dotted or slashed module names: com.acme.Cart, App\Models\User
                let slashed = source
                    .replace(['.', '\\'], "/")
                    .trim_matches('/')
                    .to_string();
                if slashed.is_empty()
                {
                    return None;
                }
                self.by_suffix(&slashed)
            }
        }
    }

    fn resolve_rust(
        &self,
        from: &Path,
        dir: &Path,
        source: &str,
    ) -> Option<PathBuf>
    {
        let segments: Vec<&str> = source
            .split("::")
            .filter(|s| !s.is_empty())
            .collect();

        // `mod foo;` declares a child module next to (or below) this file
        if segments.len() == 1 && !matches!(segments[0], "crate" | "self" | "super")
        {
            let owner_dir = match from
                .file_stem()
                .and_then(|s| s.to_str())
            {
                Some("lib" | "main" | "mod") => dir.to_path_buf(),
                Some(stem) => dir.join(stem),
                None => dir.to_path_buf(),
            };
            let name = segments[0];
            return self
                .exact(&owner_dir.join(format!("{name}.rs")))
                .or_else(|| self.exact(&owner_dir.join(name).join("mod.rs")));
        }

        let (base, rest) = match segments.first()
        {
            Some(&"crate") => (crate_src_dir(dir), &segments[1..]),
            Some(&"self") => (dir.to_path_buf(), &segments[1..]),
            Some(&"super") => (dir.parent()?.to_path_buf(), &segments[1..]),
            _ => return None,
        };

        // Longest module prefix that exists wins: crate::a::b::Item -> a/b.rs
        (1..=rest.len())
            .rev()
            .find_map(|n| {
                let module: PathBuf = rest[..n]
                    .iter()
                    .collect();
                let joined = base.join(&module);
                self.exact(&joined.with_extension("rs"))
                    .or_else(|| self.exact(&joined.join("mod.rs")))
            })
    }

    fn resolve_python(
        &self,
        dir: &Path,
        source: &str,
    ) -> Option<PathBuf>
    {
        let dots = source
            .chars()
            .take_while(|&c| c == '.')
            .count();
        let module = source[dots..].replace('.', "/");

        let base = if dots > 0
        {
            let mut base = dir.to_path_buf();
            for _ in 1..dots
            {
                base = base
                    .parent()?
                    .to_path_buf();
            }
            base
        }
        else
        {
            PathBuf::new()
        };

        if module.is_empty()
        {
            return self.exact(&base.join("__init__.py"));
        }

        let joined = base.join(&module);
        self.exact(&joined.with_extension("py"))
            .or_else(|| self.exact(&joined.join("__init__.py")))
            .or_else(|| {
                // Absolute import from a source root below the project root
                (dots == 0)
                    .then(|| self.by_suffix(&module))
                    .flatten()
            })
    }
}

/// Nearest ancestor named `src`, or the file's own directory
fn crate_src_dir(dir: &Path) -> PathBuf
{
    dir.ancestors()
        .find(|a| a.file_name() == Some(std::ffi::OsStr::new("src")))
        .unwrap_or(dir)
        .to_path_buf()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark
{
    Unvisited,
    OnStack,
    Done,
}

/// DFS with an explicit recursion stack; each back edge yields one cycle.
/// Cycles are rotated to start at their smallest path and deduplicated.
fn find_cycles(graph: &DiGraph<PathBuf, usize>) -> Vec<Vec<PathBuf>>
{
    let n = graph.node_count();
    let mut marks = vec![Mark::Unvisited; n];
    let mut found: BTreeSet<Vec<PathBuf>> = BTreeSet::new();

    let sorted_neighbors = |node: NodeIndex| {
        let mut v: Vec<NodeIndex> = graph
            .neighbors(node)
            .collect();
        v.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
        v.dedup();
        v
    };

    for start in graph.node_indices()
    {
        if marks[start.index()] != Mark::Unvisited
        {
            continue;
        }

        // (node, remaining neighbors) frames replace recursion;
        // pop() takes from the back, so neighbor lists are reversed
        let mut first = sorted_neighbors(start);
        first.reverse();
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(start, first)];
        let mut path: Vec<NodeIndex> = vec![start];
        marks[start.index()] = Mark::OnStack;

        while let Some((node, pending)) = stack.last_mut()
        {
            let node = *node;
            let Some(next) = pending.pop()
            else
            {
                marks[node.index()] = Mark::Done;
                stack.pop();
                path.pop();
                continue;
            };

            match marks[next.index()]
            {
                Mark::Unvisited =>
                {
                    marks[next.index()] = Mark::OnStack;
                    let mut neighbors = sorted_neighbors(next);
                    neighbors.reverse();
                    stack.push((next, neighbors));
                    path.push(next);
                }
                Mark::OnStack =>
                {
                    if let Some(pos) = path
                        .iter()
                        .position(|&p| p == next)
                    {
                        let cycle: Vec<PathBuf> = path[pos..]
                            .iter()
                            .map(|&i| graph[i].clone())
                            .collect();
                        found.insert(rotate_to_min(cycle));
                    }
                }
                Mark::Done => {}
            }
        }
    }

    found
        .into_iter()
        .collect()
}

fn rotate_to_min(mut cycle: Vec<PathBuf>) -> Vec<PathBuf>
{
    if let Some(min_pos) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_pos);
    }
    cycle
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::infra::paths::PathGuard;

    fn analyzer() -> DependencyAnalyzer
    {
        DependencyAnalyzer::new(1024 * 1024).unwrap()
    }

    #[test]
    fn parses_javascript_imports()
    {
        let src = "import React, { useState as useS } from 'react';\nimport './styles.css';\nconst { query } = require(\"./db\");\nexport * from './types';\n";
        let imports = analyzer().parse_imports(Path::new("src/app.js"), src);

        assert_eq!(imports.len(), 4);
        assert_eq!(imports[0].source, "react");
        assert_eq!(imports[0].symbols, vec!["React", "useS"]);
        assert_eq!(imports[1].source, "./styles.css");
        assert_eq!(imports[2].source, "./db");
        assert_eq!(imports[2].symbols, vec!["query"]);
        assert_eq!(imports[2].line, 3);
        assert_eq!(imports[3].source, "./types");
    }

    #[test]
    fn parses_python_rust_and_java_imports()
    {
        let a = analyzer();

        let py = a.parse_imports(
            Path::new("app/main.py"),
            "import os, sys\nfrom .models import User, Cart as C\n",
        );
        assert_eq!(
            py.iter()
                .map(|i| i.source.as_str())
                .collect::<Vec<_>>(),
            vec!["os", "sys", ".models"]
        );
        assert_eq!(py[2].symbols, vec!["User", "Cart"]);

        let rs = a.parse_imports(
            Path::new("src/lib.rs"),
            "mod store;\nuse crate::store::{Cart, Item};\npub use std::fmt;\n",
        );
        assert_eq!(rs[0].source, "store");
        assert_eq!(rs[1].source, "crate::store");
        assert_eq!(rs[1].symbols, vec!["Cart", "Item"]);
        assert_eq!(rs[2].symbols, vec!["fmt"]);

        let java = a.parse_imports(
            Path::new("App.java"),
            "import com.acme.store.Cart;\nimport java.util.*;\n",
        );
        assert_eq!(java[0].symbols, vec!["Cart"]);
        assert_eq!(java[1].source, "java.util");
        assert!(
            java[1]
                .symbols
                .is_empty()
        );
    }

    #[test]
    fn parses_go_import_blocks()
    {
        let src = "package main\n\nimport (\n\t\"fmt\"\n\tlog \"github.com/acme/log\"\n)\n";
        let imports = analyzer().parse_imports(Path::new("main.go"), src);
        assert_eq!(
            imports
                .iter()
                .map(|i| i.source.as_str())
                .collect::<Vec<_>>(),
            vec!["fmt", "github.com/acme/log"]
        );
    }

    fn project(files: &[(&str, &str)]) -> Result<(TempDir, Vec<ResolvedPath>)>
    {
        let tmp = TempDir::new()?;
        for (rel, body) in files
        {
            let path = tmp
                .path()
                .join(rel);
            if let Some(parent) = path.parent()
            {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, body)?;
        }
        let guard = PathGuard::new(tmp.path(), &[])?;
        let resolved = files
            .iter()
            .filter_map(|(rel, _)| guard.resolve(Path::new(rel)))
            .collect();
        Ok((tmp, resolved))
    }

    #[test]
    fn builds_edges_and_detects_cycles() -> Result<()>
    {
        let (_tmp, files) = project(&[
            ("src/a.js", "import { b } from './b';\n"),
            ("src/b.js", "const c = require('./c');\n"),
            ("src/c.js", "import a from './a.js';\nimport x from 'lodash';\n"),
            ("src/d.js", "import { b } from './b';\n"),
        ])?;

        let graph = analyzer().build_graph(&files);

        assert_eq!(graph.files.len(), 4);
        assert_eq!(graph.edges.len(), 4);
        assert_eq!(
            graph.cycles,
            vec![vec![
                PathBuf::from("src/a.js"),
                PathBuf::from("src/b.js"),
                PathBuf::from("src/c.js"),
            ]]
        );
        assert_eq!(
            graph.dependents_of(Path::new("src/b.js")),
            vec![Path::new("src/a.js"), Path::new("src/d.js")]
        );
        assert_eq!(graph.dependencies_of(Path::new("src/d.js")), vec![Path::new("src/b.js")]);
        Ok(())
    }

    #[test]
    fn graph_does_not_depend_on_file_order() -> Result<()>
    {
        let (_tmp, files) = project(&[
            ("src/a.js", "import { b } from './b';\nimport c from './c';\n"),
            ("src/b.js", "const c = require('./c');\n"),
            ("src/c.js", "import a from './a.js';\n"),
        ])?;
        let mut reversed = files.clone();
        reversed.reverse();
        let mut doubled = files.clone();
        doubled.extend(files.iter().cloned());

        let a = analyzer();
        let forward = a.build_graph(&files);
        for other in [a.build_graph(&reversed), a.build_graph(&doubled)]
        {
            assert_eq!(other.files, forward.files);
            assert_eq!(other.edges, forward.edges);
            assert_eq!(other.cycles, forward.cycles);
        }
        assert_eq!(forward.edges.len(), 4);
        Ok(())
    }

    #[test]
    fn resolves_rust_and_python_modules() -> Result<()>
    {
        let (_tmp, files) = project(&[
            ("src/lib.rs", "mod store;\nmod api;\n"),
            ("src/store.rs", "use crate::api::handlers::list;\n"),
            ("src/api/mod.rs", "pub mod handlers;\n"),
            ("src/api/handlers.rs", "use super::super::store;\n"),
            ("app/__init__.py", ""),
            ("app/main.py", "from .models import User\nimport app.util\n"),
            ("app/models.py", ""),
            ("app/util.py", ""),
        ])?;

        let graph = analyzer().build_graph(&files);
        let deps = |f: &str| {
            graph
                .dependencies_of(Path::new(f))
                .into_iter()
                .map(|p| p.to_path_buf())
                .collect::<Vec<_>>()
        };

        assert_eq!(deps("src/lib.rs"), vec![PathBuf::from("src/api/mod.rs"), PathBuf::from("src/store.rs")]);
        assert_eq!(deps("src/store.rs"), vec![PathBuf::from("src/api/handlers.rs")]);
        assert_eq!(deps("src/api/mod.rs"), vec![PathBuf::from("src/api/handlers.rs")]);
        assert_eq!(deps("app/main.py"), vec![PathBuf::from("app/models.py"), PathBuf::from("app/util.py")]);
        assert!(!graph.has_cycles());
        Ok(())
    }
}
