//! Filesystem allow-list
//!
//! Paths are resolved before they are checked: `~` is expanded, relative paths
//! are taken from the home directory, and every existing component is
//! canonicalized so symlinks and `..` cannot step outside a root. Components
//! that do not exist yet are resolved lexically.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Symlink hops followed through dangling links before giving up
const MAX_LINK_DEPTH: usize = 16;

/// Confines path operations to a fixed set of roots
#[derive(Debug, Clone)]
pub struct PathSandbox {
    roots: Vec<PathBuf>,
    home: PathBuf,
}

impl PathSandbox {
    /// Sandbox over `roots`; an empty list means home, `/tmp` and `/var/tmp`
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self::with_home(roots, home)
    }

    /// Sandbox with an explicit home directory
    pub fn with_home(roots: Vec<PathBuf>, home: PathBuf) -> Self {
        let roots = if roots.is_empty() {
            vec![home.clone(), PathBuf::from("/tmp"), PathBuf::from("/var/tmp")]
        } else {
            roots
        };

        let home = normalize(&home, 0);
        let roots = roots
            .iter()
            .map(|root| {
                let root = expand_tilde(&root.to_string_lossy(), &home);
                normalize(&absolutize(root, &home), 0)
            })
            .collect();

        Self { roots, home }
    }

    /// Canonical allow-listed roots
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Home directory (default working directory, base for relative paths)
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Fully resolve a caller-supplied path without checking it
    pub fn resolve(&self, input: &str) -> PathBuf {
        let expanded = expand_tilde(input, &self.home);
        normalize(&absolutize(expanded, &self.home), 0)
    }

    /// Whether a resolved path is a root or lies beneath one
    pub fn contains(&self, resolved: &Path) -> bool {
        self.roots.iter().any(|root| resolved.starts_with(root))
    }

    /// Resolve `input` and reject it unless it falls inside a root
    pub fn check(&self, input: &str) -> Result<PathBuf> {
        let resolved = self.resolve(input);
        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            tracing::warn!(path = %input, resolved = %resolved.display(), "Path outside allow-list");
            Err(Error::PathNotAllowed {
                role: "Path",
                path: input.to_string(),
            })
        }
    }
}

/// Expand a leading `~` or `~/`
pub fn expand_tilde(input: &str, home: &Path) -> PathBuf {
    if input == "~" {
        home.to_path_buf()
    } else if let Some(rest) = input.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(input)
    }
}

fn absolutize(path: PathBuf, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Resolve component by component, canonicalizing whatever exists
fn normalize(path: &Path, depth: usize) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                resolved = follow(resolved, depth);
            }
        }
    }
    resolved
}

/// Canonicalize an existing path, chase a dangling symlink, or keep it as is
fn follow(path: PathBuf, depth: usize) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(&path) {
        return canonical;
    }

    let is_link = std::fs::symlink_metadata(&path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link || depth >= MAX_LINK_DEPTH {
        return path;
    }

    match std::fs::read_link(&path) {
        Ok(target) => {
            let parent = path.parent().unwrap_or_else(|| Path::new("/"));
            normalize(&absolutize(target, parent), depth + 1)
        }
        Err(_) => path,
    }
}
