use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

/// Why a bounded read was refused
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("{path} is {size} bytes, above the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

pub enum FileContent {
    Mapped(Mmap),
    Buffered(String),
}

impl AsRef<str> for FileContent {
    fn as_ref(&self) -> &str {
        match self {
            // Validated in read_bounded before construction
            FileContent::Mapped(mmap) => std::str::from_utf8(mmap).unwrap_or(""),
            FileContent::Buffered(s) => s.as_str(),
        }
    }
}

/// Read a whole file if it is at most `max_size` bytes.
/// Files above the bound are refused, never partially read.
pub fn read_bounded<P: AsRef<Path>>(path: P, max_size: u64) -> Result<FileContent, ReadError> {
    let path = path.as_ref();
    let io_err = |source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = std::fs::metadata(path).map_err(io_err)?;
    if metadata.len() > max_size {
        return Err(ReadError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_size,
        });
    }

    if metadata.len() > MMAP_THRESHOLD {
        let file = File::open(path).map_err(io_err)?;

        // Safety: read-only mapping; the content is validated as UTF-8 below
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
        if std::str::from_utf8(&mmap).is_err() {
            return Err(ReadError::NotUtf8 {
                path: path.to_path_buf(),
            });
        }

        Ok(FileContent::Mapped(mmap))
    } else {
        let bytes = std::fs::read(path).map_err(io_err)?;
        let content = String::from_utf8(bytes).map_err(|_| ReadError::NotUtf8 {
            path: path.to_path_buf(),
        })?;

        Ok(FileContent::Buffered(content))
    }
}

/// Inclusive 1-based line slice, clamped to the text.
/// Returns the clamped (start, end) alongside the joined lines.
pub fn slice_lines(content: &str, start: usize, end: usize) -> Option<(usize, usize, String)> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return None;
    }

    let start = start.max(1);
    let end = end.min(lines.len());
    if start > end {
        return None;
    }

    Some((start, end, lines[start - 1..end].join("\n")))
}

/// Window of `radius` lines on each side of `line`, clamped to the text
pub fn window_around(content: &str, line: usize, radius: usize) -> Option<(usize, usize, String)> {
    slice_lines(content, line.saturating_sub(radius), line.saturating_add(radius))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_lines_clamps_to_bounds() {
        let content = "line1\nline2\nline3\nline4\nline5";

        let (s, e, body) = slice_lines(content, 2, 3).unwrap();
        assert_eq!((s, e), (2, 3));
        assert_eq!(body, "line2\nline3");

        let (s, e, body) = slice_lines(content, 4, 99).unwrap();
        assert_eq!((s, e), (4, 5));
        assert_eq!(body, "line4\nline5");

        assert!(slice_lines(content, 9, 12).is_none());
        assert!(slice_lines("", 1, 1).is_none());
    }

    #[test]
    fn test_window_around_start_of_file() {
        let content = (1..=30).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");

        let (s, e, _) = window_around(&content, 2, 5).unwrap();
        assert_eq!((s, e), (1, 7));

        let (s, e, _) = window_around(&content, 28, 5).unwrap();
        assert_eq!((s, e), (23, 30));
    }

    #[test]
    fn test_read_bounded_refuses_large_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "x".repeat(64)).unwrap();

        assert!(matches!(
            read_bounded(&path, 16),
            Err(ReadError::TooLarge { size: 64, .. })
        ));
        assert_eq!(read_bounded(&path, 64).unwrap().as_ref().len(), 64);
    }

    #[test]
    fn test_read_bounded_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            read_bounded(dir.path().join("nope.rs"), 1024),
            Err(ReadError::Io { .. })
        ));
    }
}
