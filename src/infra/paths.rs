//! Path safety for every file read the pipeline performs.
//!
//! A requested path is resolved against a fixed root, canonicalized, and
//! accepted only when it stays inside that root and outside every excluded
//! directory. Rejections are not errors: callers get `None` and treat the
//! path as non-existent.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::trace;

/// A path that passed the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath
{
    /// Canonical absolute path, safe to open
    pub absolute: PathBuf,

    /// Path relative to the guard root
    pub relative: PathBuf,
}

/// Root containment plus exclude-pattern filter
#[derive(Debug, Clone)]
pub struct PathGuard
{
    /// Canonical root directory
    root: PathBuf,

    /// Directory names, or '/'-separated fragments, never read
    excludes: Vec<String>,
}

impl PathGuard
{
    /// Build a guard; the root must exist
    pub fn new(
        root: &Path,
        excludes: &[String],
    ) -> Result<Self>
    {
        let root = dunce::canonicalize(root)
            .with_context(|| format!("Failed to resolve root {}", root.display()))?;

        Ok(Self {
            root,
            excludes: excludes
                .iter()
                .map(|p| {
                    p.trim_matches('/')
                        .replace('\\', "/")
                })
                .filter(|p| !p.is_empty())
                .collect(),
        })
    }

    pub fn root(&self) -> &Path
    {
        &self.root
    }

    /// Resolve `requested` (absolute, or relative to the root).
    /// Returns `None` when the path is missing, escapes the root, or
    /// falls under an excluded directory.
    pub fn resolve(
        &self,
        requested: &Path,
    ) -> Option<ResolvedPath>
    {
        let candidate = if requested.is_absolute()
        {
            requested.to_path_buf()
        }
        else
        {
            self.root
                .join(requested)
        };

        // Canonicalization resolves `..` and symlinks; missing files fail here
        let absolute = dunce::canonicalize(&candidate).ok()?;

        let relative = match absolute.strip_prefix(&self.root)
        {
            Ok(rel) => rel.to_path_buf(),
            Err(_) =>
            {
                trace!(path = %requested.display(), "rejected: outside root");
                return None;
            }
        };

        if self.is_excluded(&relative)
        {
            trace!(path = %requested.display(), "rejected: excluded pattern");
            return None;
        }

        Some(ResolvedPath { absolute, relative })
    }

    /// Like [`resolve`](Self::resolve), but when the path does not exist
    /// as given, retry with progressively shorter suffixes under the root.
    /// Stack frames recorded on another machine (`/app/src/user.js`)
    /// usually match a suffix of the local checkout (`src/user.js`).
    pub fn resolve_loose(
        &self,
        requested: &Path,
    ) -> Option<ResolvedPath>
    {
        if let Some(found) = self.resolve(requested)
        {
            return Some(found);
        }

        let parts: Vec<&std::ffi::OsStr> = requested
            .components()
            .filter_map(|c| {
                match c
                {
                    Component::Normal(s) => Some(s),
                    _ => None,
                }
            })
            .collect();

        (1..parts.len()).find_map(|skip| {
            let suffix: PathBuf = parts[skip..]
                .iter()
                .collect();
            self.resolve(&suffix)
        })
    }

    /// True when any component of `relative` matches an exclude pattern
    pub fn is_excluded(
        &self,
        relative: &Path,
    ) -> bool
    {
        let as_text = relative
            .to_string_lossy()
            .replace('\\', "/");

        self.excludes
            .iter()
            .any(|pat| {
                if pat.contains('/')
                {
                    // Multi-segment fragment: match on segment boundaries
                    format!("/{as_text}/").contains(&format!("/{pat}/"))
                }
                else
                {
                    relative
                        .components()
                        .any(|c| c.as_os_str() == pat.as_str())
                }
            })
    }
}
