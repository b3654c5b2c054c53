//! Content layout of the screenshot library on disk.
//!
//! ```text
//! {library_dir}/{game.folder_name}/{filename}.{ext}
//! {library_dir}/{game.folder_name}/thumbs/{stem}_sm.jpg
//! {library_dir}/{game.folder_name}/thumbs/{stem}_md.jpg
//! ```
//!
//! All writes go through temp-file + atomic rename. No lock files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_FOLDER_NAME_LEN: usize = 64;

/// Derives a filesystem-safe folder name from a game name: lowercased,
/// runs of non-alphanumerics collapsed to a single dash, length-bounded.
pub fn derive_folder_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out.truncate(MAX_FOLDER_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("game");
    }
    out
}

/// Strips characters that are invalid in Windows or Linux filenames and
/// trailing dots/spaces. Empty results become "unknown".
pub fn sanitize_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .filter(|c| !matches!(*c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && *c >= ' ')
        .collect();

    while out.ends_with('.') || out.ends_with(' ') {
        out.pop();
    }
    let out = out.trim().to_string();
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// Resolves a filename that collides inside the game's folder by
/// suffixing the stem with the first 8 hex chars of the content hash.
pub fn unique_filename(dir: &Path, desired: &str, file_hash: &str) -> String {
    if !dir.join(desired).exists() {
        return desired.to_string();
    }

    let (stem, ext) = split_extension(desired);
    let suffix = &file_hash[..file_hash.len().min(8)];
    if ext.is_empty() {
        format!("{}_{}", stem, suffix)
    } else {
        format!("{}_{}.{}", stem, suffix, ext)
    }
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (filename, ""),
    }
}

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn game_dir(&self, folder_name: &str) -> PathBuf {
        self.root.join(folder_name)
    }

    pub fn thumbs_dir(&self, folder_name: &str) -> PathBuf {
        self.game_dir(folder_name).join("thumbs")
    }

    pub fn original_path(&self, folder_name: &str, filename: &str) -> PathBuf {
        self.game_dir(folder_name).join(filename)
    }

    pub fn thumb_path(&self, folder_name: &str, stem: &str, size: &str) -> PathBuf {
        self.thumbs_dir(folder_name)
            .join(format!("{}_{}.jpg", stem, size))
    }

    /// Path stored in the database: relative to the library root.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Writes bytes via a temp file in the target directory followed by
    /// an atomic rename, creating parent directories as needed.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let filename = path
            .file_name()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no filename")
            })?
            .to_string_lossy();
        let tmp_path = parent.join(format!(".{}.tmp", filename));

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        match fs::rename(&tmp_path, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    pub fn remove_file(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn folder_name_collapses_and_lowercases() {
        assert_eq!(derive_folder_name("Half-Life 2"), "half-life-2");
        assert_eq!(derive_folder_name("  ELDEN RING™  "), "elden-ring");
        assert_eq!(derive_folder_name("Baldur's Gate 3"), "baldur-s-gate-3");
    }

    #[test]
    fn folder_name_is_length_bounded() {
        let long = "x".repeat(200);
        assert_eq!(derive_folder_name(&long).len(), MAX_FOLDER_NAME_LEN);
    }

    #[test]
    fn folder_name_never_empty() {
        assert_eq!(derive_folder_name("™®©"), "game");
        assert_eq!(derive_folder_name(""), "game");
    }

    #[test]
    fn sanitize_strips_invalid_chars() {
        assert_eq!(sanitize_filename("shot<1>:2.jpg"), "shot12.jpg");
        assert_eq!(sanitize_filename("a/b\\c.png"), "abc.png");
        assert_eq!(sanitize_filename("trailing. . "), "trailing");
        assert_eq!(sanitize_filename("???"), "unknown");
    }

    #[test]
    fn unique_filename_suffixes_on_collision() {
        let dir = TempDir::new().unwrap();
        let hash = "deadbeefcafebabe";

        assert_eq!(unique_filename(dir.path(), "a.jpg", hash), "a.jpg");

        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        assert_eq!(unique_filename(dir.path(), "a.jpg", hash), "a_deadbeef.jpg");
    }

    #[test]
    fn write_atomic_creates_dirs_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let lib = Library::new(dir.path());

        let path = lib.original_path("half-life-2", "shot.jpg");
        lib.write_atomic(&path, b"bytes").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn relative_path_strips_root() {
        let dir = TempDir::new().unwrap();
        let lib = Library::new(dir.path());
        let path = lib.original_path("game", "shot.jpg");
        assert_eq!(lib.relative_path(&path), "game/shot.jpg");
    }
}
