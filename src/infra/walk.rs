//! Gitignore-aware source enumeration for the dependency and pattern scans.
//! - Respects .gitignore, .git/info/exclude, and global gitignore
//! - Excluded directory names are pruned during traversal
//! - Optional extension allow-list and max depth
//! - Deterministic ordering for stable tests/CI
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};

/// Walker over source files below a root.
/// Exclude patterns are applied in two places:
///   1) Early: prune directories during traversal (filter_entry).
///   2) Late: filter out files that still slipped through.
pub struct FileWalker
{
    /// Compiled exclude patterns, matched on root-relative paths
    exclude: GlobSet,

    /// Lowercase extensions without the dot; empty means "any"
    extensions: Vec<String>,

    /// Include hidden (dot) files; default true
    include_hidden: bool,

    /// Maximum recursion depth; default None (unbounded)
    max_depth: Option<usize>,
}

impl FileWalker
{
    /// Build a walker from directory names ("node_modules") or path
    /// fragments ("src/generated"). Each matches at any depth.
    pub fn new(excludes: &[String]) -> Result<Self>
    {
        let mut builder = GlobSetBuilder::new();

        for pattern in excludes
        {
            let pattern = pattern.trim_matches('/');
            if pattern.is_empty()
            {
                continue;
            }
            builder.add(Glob::new(&format!("**/{pattern}"))?);
            builder.add(Glob::new(&format!("**/{pattern}/**"))?);
        }

        Ok(Self {
            exclude: builder.build()?,
            extensions: Vec::new(),
            include_hidden: true,
            max_depth: None,
        })
    }

    /// Restrict the walk to these extensions (with or without leading dot)
    pub fn with_extensions(
        mut self,
        extensions: &[String],
    ) -> Self
    {
        self.extensions = extensions
            .iter()
            .map(|e| {
                e.trim_start_matches('.')
                    .to_ascii_lowercase()
            })
            .collect();
        self
    }

    /// Include or exclude hidden files (dotfiles).
    pub fn with_include_hidden(
        mut self,
        include_hidden: bool,
    ) -> Self
    {
        self.include_hidden = include_hidden;
        self
    }

    /// Limit recursion depth (`None` = unbounded).
    pub fn with_max_depth(
        mut self,
        depth: Option<usize>,
    ) -> Self
    {
        self.max_depth = depth;
        self
    }

    /// True when `path` carries one of the allowed extensions
    pub fn extension_allowed(
        &self,
        path: &Path,
    ) -> bool
    {
        if self
            .extensions
            .is_empty()
        {
            return true;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(e))
            })
    }

    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // WalkBuilder::hidden(true) skips dotfiles, so invert our flag
        b.hidden(!self.include_hidden);

        b.git_ignore(true);
        b.git_global(true);
        b.git_exclude(true);

        b.follow_links(false);
        b.max_depth(self.max_depth);

        // Prune on the relative path so a root below e.g. "build/" still walks
        let exclude = self
            .exclude
            .clone();
        let root_owned = root.to_path_buf();
        b.filter_entry(move |ent: &DirEntry| {
            let is_dir = ent
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if !is_dir
            {
                return true;
            }

            match ent
                .path()
                .strip_prefix(&root_owned)
            {
                Ok(rel) if !rel
                    .as_os_str()
                    .is_empty() =>
                {
                    !exclude.is_match(rel)
                }
                _ => true,
            }
        });

        b
    }

    /// Traverse files under `root`.
    /// Returns a **sorted** list of absolute file paths.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();
        let walker = self
            .build_walk(root_path)
            .build();

        let mut out: Vec<PathBuf> = walker
            // Unreadable entries are skipped like any other per-file failure
            .filter_map(|res| res.ok())
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            .filter(|abs| self.extension_allowed(abs))
            .filter(|abs| {
                let rel = abs
                    .strip_prefix(root_path)
                    .unwrap_or(abs);
                !self
                    .exclude
                    .is_match(rel)
            })
            .collect();

        out.sort();

        out
    }
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    /// Create a file with parent dirs as needed
    fn write_file(
        root: &Path,
        rel: &str,
        contents: &str,
    ) -> Result<()>
    {
        let path = root.join(rel);
        if let Some(parent) = path.parent()
        {
            std::fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn relative(
        root: &Path,
        files: Vec<PathBuf>,
    ) -> Vec<PathBuf>
    {
        files
            .into_iter()
            .map(|p| {
                p.strip_prefix(root)
                    .map(Path::to_path_buf)
                    .unwrap_or(p)
            })
            .collect()
    }

    #[test]
    fn test_excluded_dirs_are_pruned() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "target/build/a.rs", "fn a() {}")?;
        write_file(root, "node_modules/pkg/index.js", "js")?;
        write_file(root, "src/node_modules_shim.js", "js")?;
        write_file(root, "src/lib.rs", "pub fn x() {}")?;

        let walker = FileWalker::new(&["target".to_string(), "node_modules".to_string()])?;
        let files = relative(root, walker.walk_files(root));

        assert_eq!(
            files,
            vec![PathBuf::from("src/lib.rs"), PathBuf::from("src/node_modules_shim.js")]
        );
        Ok(())
    }

    #[test]
    fn test_extension_allow_list() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let root = tmp.path();

        write_file(root, "src/lib.rs", "pub fn x() {}")?;
        write_file(root, "README.md", "# readme")?;
        write_file(root, "script.PY", "print('hi')")?;

        let walker = FileWalker::new(&[])?.with_extensions(&["rs".to_string(), ".py".to_string()]);
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec![PathBuf::from("script.PY"), PathBuf::from("src/lib.rs")]);
        Ok(())
    }

    #[test]
    fn test_hidden_and_depth() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let root = tmp.path();

        write_file(root, ".hidden.rs", "h")?;
        write_file(root, "a.rs", "a")?;
        write_file(root, "sub/b.rs", "b")?;

        let walker = FileWalker::new(&[])?
            .with_include_hidden(false)
            .with_max_depth(Some(1));
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec![PathBuf::from("a.rs")]);
        Ok(())
    }
}
