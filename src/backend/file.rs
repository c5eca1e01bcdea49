use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::store::FileStore;

/// Blob pool rooted at one directory. Paths are written as absolute
/// (`/avatars/42.png`) and resolved under the root.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|err| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("file pool root {}: {}", root.display(), err),
            )
        })?;
        if !metadata.is_dir() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("file pool root {} is not a directory", root.display()),
            ));
        }
        Ok(LocalFileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an absolute pool path onto the filesystem. `..` may not climb
    /// above the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let Some(relative) = path.strip_prefix('/') else {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("path `{}` must be absolute", path),
            ));
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in relative.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(Error::new(
                            ErrorKind::InvalidArgument,
                            format!("path `{}` escapes the pool root", path),
                        ));
                    }
                }
                name => parts.push(name),
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Ok(resolved)
    }

    pub(crate) fn create_dir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }

    /// Remove a directory and everything below it. Missing is fine.
    pub(crate) fn delete_dir(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.resolve(path)?) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// File names directly inside a directory, sorted. A missing
    /// directory lists as empty.
    pub(crate) fn list(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.resolve(path)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl FileStore for LocalFileStore {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?)?)
    }

    /// Write through a temporary sibling and rename, so readers never see
    /// a half-written file.
    fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let parent = target.parent().ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, format!("`{}` names the pool root", path))
        })?;
        fs::create_dir_all(parent)?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, content)?;
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        Ok(fs::remove_file(self.resolve(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_creates_parents_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();
        store.write("/a/b/c.txt", b"hello").unwrap();
        assert_eq!(store.read("/a/b/c.txt").unwrap(), b"hello");
        store.write("/a/b/c.txt", b"bye").unwrap();
        assert_eq!(store.read("/a/b/c.txt").unwrap(), b"bye");
        assert_eq!(store.list("/a/b").unwrap(), vec!["c.txt"]);
    }

    #[test]
    fn paths_must_be_absolute_and_stay_inside() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();
        assert_eq!(store.write("relative.txt", b"x").unwrap_err().kind, ErrorKind::InvalidArgument);
        assert_eq!(store.read("/../etc/passwd").unwrap_err().kind, ErrorKind::InvalidArgument);
        assert_eq!(store.resolve("/a/../b").unwrap(), dir.path().join("b"));
    }

    #[test]
    fn missing_files_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();
        assert!(store.read("/nope").unwrap_err().is_not_found());
        assert!(store.delete("/nope").unwrap_err().is_not_found());
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"").unwrap();
        assert!(LocalFileStore::new(&file).is_err());
        assert!(LocalFileStore::new(dir.path().join("missing")).is_err());
    }
}
