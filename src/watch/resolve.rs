// src/watch/resolve.rs

//! Map an observed path to a package record.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::WatchedDirectory;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::store::{Package, Store};
use crate::watch::path_utils::location_string;

static TRAILING_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$")
        .expect("static uuid regex")
});

#[derive(Debug, Clone)]
pub struct Resolution {
    pub package: Package,
    /// True if this call created the record.
    pub created: bool,
}

/// UUID at the end of the last path component (or of its stem, for files
/// with an extension).
pub fn infer_uuid(path: &Path) -> Option<Uuid> {
    let candidates = [path.file_name(), path.file_stem()];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|name| name.to_str())
        .find_map(|name| {
            TRAILING_UUID
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| Uuid::parse_str(m.as_str()).ok())
        })
}

/// Find or create the package for `path`.
///
/// 1. A UUID embedded in the name with an existing record resumes that
///    package. If it moved only its location is rewritten, so a walker
///    running the package keeps its own cursor and picks the path up.
/// 2. Otherwise a record with the same stored location is reused.
/// 3. Otherwise a new package is created atomically, keyed by location. It
///    takes the embedded UUID if there is one.
pub fn resolve_package(
    store: &dyn Store,
    fs: &dyn FileSystem,
    path: &Path,
    watched_index: usize,
    watched: &WatchedDirectory,
) -> Result<Resolution> {
    let location = location_string(path, fs.is_dir(path));

    let inferred = infer_uuid(path);
    if let Some(uuid) = inferred {
        if let Some(mut package) = store.package(uuid)? {
            if package.location != location {
                debug!(package = %uuid, from = %package.location, to = %location, "package moved");
                package = store.update_package(uuid, &mut |p: &mut Package| {
                    p.location = location.clone()
                })?;
            }
            return Ok(Resolution {
                package,
                created: false,
            });
        }
    }

    if let Some(package) = store.package_by_location(&location)? {
        return Ok(Resolution {
            package,
            created: false,
        });
    }

    let candidate = Package::new(
        inferred.unwrap_or_else(Uuid::new_v4),
        watched.unit_type,
        location,
        Some(watched_index),
    );
    let (package, created) = store.create_package_if_absent(candidate)?;
    if created {
        info!(package = %package.uuid, location = %package.location, unit = %package.unit_type, "new package");
    }
    Ok(Resolution { package, created })
}
