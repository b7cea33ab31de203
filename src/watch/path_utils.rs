// src/watch/path_utils.rs

//! Path helpers for watched directories.

use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{EngineError, Result};

/// Reduce `path` to the immediate child of `root` it lies under.
///
/// Events deep inside a package (`root/pkg/objects/a.txt`) map to the package
/// itself (`root/pkg`). Returns `None` for `root` itself or unrelated paths.
/// Falls back to canonicalized paths when the prefixes differ (symlinks,
/// `/private/var` on macOS).
pub fn immediate_child(root: &Path, path: &Path) -> Option<PathBuf> {
    if let Some(child) = first_component(root, path) {
        return Some(child);
    }
    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        return first_component(&root_canon, &path_canon).map(|c| {
            // report it under the configured root, not the canonical one
            root.join(c.strip_prefix(&root_canon).unwrap_or(&c))
        });
    }
    None
}

fn first_component(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    match rel.components().next()? {
        Component::Normal(name) => Some(root.join(name)),
        _ => None,
    }
}

/// Directory locations carry a trailing `/`, file locations do not.
pub fn location_string(path: &Path, is_dir: bool) -> String {
    let mut s = path.to_string_lossy().replace('\\', "/");
    if is_dir {
        if !s.ends_with('/') {
            s.push('/');
        }
    } else {
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

/// Compile `[engine].ignore` into a matcher over entry names.
pub fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| EngineError::ConfigError(format!("ignore pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::ConfigError(format!("building ignore set: {e}")))
}

/// True if the last component of `path` matches an ignore pattern.
pub fn is_ignored(ignore: &GlobSet, path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| ignore.is_match(Path::new(name)))
}
