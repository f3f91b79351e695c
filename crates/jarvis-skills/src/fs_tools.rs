//! Sandboxed file tools.
//!
//! All paths are relative to one root directory (the user's Desktop unless configured).
//! Absolute paths, drive prefixes and `..` that climb above the root are rejected before
//! touching the filesystem; symlinks are resolved and must still land inside the root.

use crate::error::{ToolError, ToolResult};
use jarvis_core::ToolSettings;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Root used when `tools.sandbox_root` is unset.
fn default_root() -> ToolResult<PathBuf> {
    dirs::desktop_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Desktop")))
        .ok_or_else(|| ToolError::NotAvailable("cannot determine the Desktop directory".into()))
}

/// A directory the file tools may not leave.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    max_listed: usize,
    max_read_chars: usize,
}

impl Sandbox {
    /// Creates the root if needed and pins its canonical path.
    pub fn new(root: impl AsRef<Path>, max_listed: usize, max_read_chars: usize) -> ToolResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        info!("📁 File sandbox at {}", root.display());
        Ok(Self {
            root,
            max_listed,
            max_read_chars,
        })
    }

    pub fn from_settings(settings: &ToolSettings) -> ToolResult<Self> {
        let root = match &settings.sandbox_root {
            Some(root) => root.clone(),
            None => default_root()?,
        };
        Self::new(root, settings.max_listed_files, settings.max_read_chars)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a model-supplied relative path into the sandbox.
    pub fn resolve(&self, relative: &str) -> ToolResult<PathBuf> {
        let relative = relative.trim();
        if relative.is_empty() {
            return Err(ToolError::InvalidArguments("a file or folder name is required".into()));
        }

        let mut normalized = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(deny(relative));
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(deny(relative)),
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(ToolError::InvalidArguments(format!("'{relative}' does not name an entry")));
        }

        self.ensure_inside(&normalized, relative)?;
        Ok(self.root.join(&normalized))
    }

    /// Walk `relative` from the root without following links implicitly. Every symlink on the
    /// way must resolve to an existing target inside the root; dangling links are denied.
    fn ensure_inside(&self, relative: &Path, shown: &str) -> ToolResult<()> {
        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let real = current.canonicalize().map_err(|_| deny(shown))?;
                    if !real.starts_with(&self.root) {
                        return Err(deny(shown));
                    }
                    current = real;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Visible entries of the root, sorted, at most `max_listed`.
    pub fn list(&self) -> ToolResult<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names.truncate(self.max_listed);
        Ok(names)
    }

    /// File contents, truncated to `max_read_chars` characters.
    pub fn read(&self, name: &str) -> ToolResult<String> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(ToolError::NotFound(format!("file '{name}'")));
        }
        let bytes = fs::read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        debug!(target: "jarvis::fs", path = %path.display(), "Read file");
        Ok(text.chars().take(self.max_read_chars).collect())
    }

    /// Create or overwrite a file, creating missing parent folders inside the sandbox.
    pub fn write(&self, name: &str, content: &str) -> ToolResult<PathBuf> {
        let path = self.resolve(name)?;
        if path.is_dir() {
            return Err(ToolError::InvalidArguments(format!("'{name}' is a folder")));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        info!("📝 Wrote {}", path.display());
        Ok(path)
    }

    pub fn create_folder(&self, name: &str) -> ToolResult<PathBuf> {
        let path = self.resolve(name)?;
        fs::create_dir_all(&path)?;
        info!("📂 Created folder {}", path.display());
        Ok(path)
    }
}

fn deny(path: &str) -> ToolError {
    ToolError::PermissionDenied(format!("'{path}' is outside the allowed folder"))
}
