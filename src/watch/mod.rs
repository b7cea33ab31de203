// src/watch/mod.rs

//! Watched directories: polling, path reduction and package resolution.

pub mod path_utils;
pub mod resolve;
pub mod watcher;

pub use resolve::{infer_uuid, resolve_package, Resolution};
pub use watcher::{spawn_watcher, WatcherHandle};
