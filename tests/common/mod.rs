#![allow(dead_code, unused_imports)]

pub use ingestflow_test_utils::builders::SHARED;
pub use ingestflow_test_utils::*;

use std::sync::Arc;

use ingestflow::exec::{ScriptContract, ScriptRegistry};

/// Registry with one fake per `(name, script)` pair and an empty contract.
pub fn registry_of(scripts: &[(&str, &FakeScript)]) -> ScriptRegistry {
    let mut registry = ScriptRegistry::new();
    for (name, script) in scripts {
        registry.register(*name, ScriptContract::new(), script.handler());
    }
    registry
}

/// A mock filesystem holding a package directory with the given files
/// (paths relative to the package root).
pub fn mock_package(root: &str, files: &[&str]) -> Arc<ingestflow::fs::mock::MockFileSystem> {
    let fs = ingestflow::fs::mock::MockFileSystem::new();
    fs.add_dir(root);
    for f in files {
        fs.add_file(format!("{}/{}", root.trim_end_matches('/'), f), "x");
    }
    Arc::new(fs)
}
