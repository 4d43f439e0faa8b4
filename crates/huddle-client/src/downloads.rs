//! Saves received files and recordings into a download folder.

use std::path::{Path, PathBuf};

use tracing::info;

use huddle_media::ArtifactSink;

#[derive(Debug, Clone)]
pub struct FsDownloads {
    dir: PathBuf,
}

impl FsDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for FsDownloads {
    /// Write under a sanitized name, never overwriting: `a.txt` becomes
    /// `a (1).txt` when taken.
    fn save(&self, file_name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = unique_path(&self.dir, &sanitize_file_name(file_name));
        std::fs::write(&path, data)?;
        info!(path = %path.display(), bytes = data.len(), "File saved");
        Ok(path)
    }
}

/// Keep only the final path component and drop characters no file system
/// accepts.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\x\\re:port?.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("///"), "download");
    }

    #[test]
    fn test_save_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsDownloads::new(dir.path().join("dl"));

        let first = sink.save("notes.txt", b"one").unwrap();
        let second = sink.save("notes.txt", b"two").unwrap();
        let third = sink.save("notes.txt", b"three").unwrap();

        assert_eq!(first.file_name().unwrap(), "notes.txt");
        assert_eq!(second.file_name().unwrap(), "notes (1).txt");
        assert_eq!(third.file_name().unwrap(), "notes (2).txt");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&third).unwrap(), b"three");
    }
}
