// src/exec/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::ConfigFile;
use crate::errors::{EngineError, Result};
use crate::exec::command::CommandScript;
use crate::exec::contract::{ScriptContract, ScriptHandler};
use crate::workflow::WorkflowGraph;

pub struct RegisteredScript {
    pub name: String,
    pub contract: ScriptContract,
    pub handler: Arc<dyn ScriptHandler>,
}

/// Script name → handler and contract. Passed explicitly to the dispatcher.
#[derive(Default, Clone)]
pub struct ScriptRegistry {
    scripts: BTreeMap<String, Arc<RegisteredScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `CommandScript` for every `[script.<name>]` section.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::new();
        for (name, script) in cfg.scripts.iter() {
            let handler = CommandScript::from_config(script)?;
            registry.register(name, ScriptContract::from_config(script), Arc::new(handler));
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        contract: ScriptContract,
        handler: Arc<dyn ScriptHandler>,
    ) -> &mut Self {
        let name = name.into();
        self.scripts.insert(
            name.clone(),
            Arc::new(RegisteredScript {
                name,
                contract,
                handler,
            }),
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredScript>> {
        self.scripts.get(name).cloned()
    }

    /// Check that every task link names a registered script, that its
    /// argument template fits the script's `params`, and that every code the
    /// script declares is routed by the link's exit map.
    pub fn validate_workflow(&self, graph: &WorkflowGraph) -> Result<()> {
        for id in graph.ids() {
            let Some(link) = graph.get(id) else { continue };
            let Some(template) = link.template() else {
                continue;
            };
            let script = self
                .get(&template.script)
                .ok_or_else(|| EngineError::UnknownScript(template.script.clone()))?;

            if let Some(params) = script.contract.params {
                if template.arguments.len() != params {
                    return Err(EngineError::ConfigError(format!(
                        "link '{}' passes {} arguments to '{}', which takes {}",
                        link.id,
                        template.arguments.len(),
                        script.name,
                        params
                    )));
                }
            }

            let mut unrouted: Vec<i32> = script
                .contract
                .exit_codes
                .iter()
                .copied()
                .filter(|code| !link.exit_codes.resolves(*code))
                .collect();
            unrouted.sort();
            if !unrouted.is_empty() {
                return Err(EngineError::ConfigError(format!(
                    "link '{}' does not route exit codes {:?} of script '{}' and has no default",
                    link.id, unrouted, script.name
                )));
            }

            if link.exit_codes.indeterminate_entry().is_none() {
                debug!(
                    link = %link.id,
                    script = %script.name,
                    "link has no `indeterminate` exit; indeterminate outcomes will fail the package"
                );
            }
        }
        Ok(())
    }
}
