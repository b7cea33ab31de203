// src/workflow/args.rs

//! Placeholder substitution for task argument templates.
//!
//! Package-level placeholders: `%SIPUUID%`, `%SIPName%`, `%SIPDirectory%`,
//! `%SIPDirectoryBasename%`, `%unitType%`, `%sharedPath%`, `%date%`,
//! `%jobUUID%`, `%taskUUID%`. Per-file tasks also get `%fileUUID%`,
//! `%inputFile%` and `%relativeLocation%`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::Package;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z]+)%").expect("static placeholder regex"));

/// One file a per-file task runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileItem {
    pub path: PathBuf,
    /// Path relative to the package root, `/`-separated.
    pub relative: String,
}

impl FileItem {
    /// Stable per package: the same file always gets the same UUID.
    pub fn uuid(&self, package: Uuid) -> Uuid {
        Uuid::new_v5(&package, self.relative.as_bytes())
    }
}

pub struct ArgContext<'a> {
    pub package: &'a Package,
    pub shared_dir: &'a Path,
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub now: DateTime<Utc>,
    pub file: Option<&'a FileItem>,
}

/// Resolve every argument of `template`, then check the count against the
/// script's declared `params`.
pub fn resolve_arguments(
    template: &[String],
    ctx: &ArgContext<'_>,
    params: Option<usize>,
) -> Result<Vec<String>> {
    if let Some(expected) = params {
        if template.len() != expected {
            return Err(EngineError::Argument(format!(
                "script expects {expected} arguments, template has {}",
                template.len()
            )));
        }
    }
    template.iter().map(|arg| substitute(arg, ctx)).collect()
}

fn substitute(arg: &str, ctx: &ArgContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(arg.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(arg) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&arg[last..whole.start()]);
        out.push_str(&value_for(name.as_str(), ctx)?);
        last = whole.end();
    }
    out.push_str(&arg[last..]);
    Ok(out)
}

fn value_for(name: &str, ctx: &ArgContext<'_>) -> Result<String> {
    let package = ctx.package;
    let value = match name {
        "SIPUUID" => package.uuid.to_string(),
        "SIPName" => package.name(),
        "SIPDirectory" => package.location.clone(),
        "SIPDirectoryBasename" => package.basename(),
        "unitType" => package.unit_type.as_str().to_string(),
        "sharedPath" => with_trailing_slash(ctx.shared_dir),
        "date" => ctx.now.to_rfc3339(),
        "jobUUID" => ctx.job_id.to_string(),
        "taskUUID" => ctx.task_id.to_string(),
        "fileUUID" | "inputFile" | "relativeLocation" => {
            let file = ctx.file.ok_or_else(|| {
                EngineError::Argument(format!("%{name}% is only available to per-file tasks"))
            })?;
            match name {
                "fileUUID" => file.uuid(package.uuid).to_string(),
                "inputFile" => file.path.to_string_lossy().into_owned(),
                _ => file.relative.clone(),
            }
        }
        other => {
            return Err(EngineError::Argument(format!(
                "unknown placeholder %{other}%"
            )))
        }
    };
    Ok(value)
}

fn with_trailing_slash(path: &Path) -> String {
    let mut s = path.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}
