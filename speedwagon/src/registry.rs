//! Plugin registry: collects workflows contributed by plugins
//!
//! Every plugin hook is called exactly once while the registry is built.
//! Afterwards the registry is read-only; rebuilding it means building a new one.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use speedwagon_sdk::{Capabilities, FullWorkflowMetadata, PluginDiscoveryError, Workflow};

/// Hook contributed by a plugin: display name -> workflow
pub type PluginHook = Box<dyn Fn() -> Result<BTreeMap<String, Arc<dyn Workflow>>> + Send + Sync>;

/// A named extension that contributes workflows
pub struct Plugin {
    name: String,
    hook: PluginHook,
}

impl Plugin {
    pub fn new<F>(name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Result<BTreeMap<String, Arc<dyn Workflow>>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            hook: Box::new(hook),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A workflow as the registry recorded it
#[derive(Clone)]
pub struct RegisteredWorkflow {
    pub display_name: String,
    pub plugin: String,
    pub capabilities: Capabilities,
    pub workflow: Arc<dyn Workflow>,
}

impl RegisteredWorkflow {
    pub fn id(&self) -> String {
        self.workflow.metadata().id
    }

    pub fn full_metadata(&self) -> FullWorkflowMetadata {
        let mut metadata = self.workflow.metadata();
        metadata.name = self.display_name.clone();
        FullWorkflowMetadata {
            metadata,
            plugin: self.plugin.clone(),
            capabilities: self.capabilities,
            options: self.workflow.job_options(),
        }
    }
}

/// Builder for [`PluginRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    plugins: Vec<Plugin>,
    disabled: HashSet<String>,
}

impl RegistryBuilder {
    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn disable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(names.into_iter().map(Into::into));
        self
    }

    /// Run every hook, isolating failures and rejecting duplicate names or ids
    pub fn build(self) -> PluginRegistry {
        let mut workflows: BTreeMap<String, RegisteredWorkflow> = BTreeMap::new();
        // Workflow id -> plugin that registered it
        let mut ids: HashMap<String, String> = HashMap::new();
        let mut problems = Vec::new();

        for plugin in self.plugins {
            if self.disabled.contains(&plugin.name) {
                debug!(plugin = %plugin.name, "plugin disabled, skipping");
                continue;
            }

            let contributed = match catch_unwind(AssertUnwindSafe(|| (plugin.hook)())) {
                Ok(Ok(contributed)) => contributed,
                Ok(Err(e)) => {
                    let err = PluginDiscoveryError::HookFailed {
                        plugin: plugin.name.clone(),
                        reason: format!("{:#}", e),
                    };
                    warn!("{}", err);
                    problems.push(err);
                    continue;
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    let err = PluginDiscoveryError::HookPanicked {
                        plugin: plugin.name.clone(),
                        reason,
                    };
                    warn!("{}", err);
                    problems.push(err);
                    continue;
                }
            };

            for (display_name, workflow) in contributed {
                let id = workflow.metadata().id;
                // Both keys resolve through `get`, so neither may shadow an earlier entry
                let taken = workflows
                    .get(&display_name)
                    .map(|w| (display_name.clone(), w.plugin.clone()))
                    .or_else(|| ids.get(&display_name).map(|p| (display_name.clone(), p.clone())))
                    .or_else(|| ids.get(&id).map(|p| (id.clone(), p.clone())))
                    .or_else(|| workflows.get(&id).map(|w| (id.clone(), w.plugin.clone())));
                if let Some((key, existing_plugin)) = taken {
                    let err = PluginDiscoveryError::DuplicateWorkflow {
                        workflow: key,
                        plugin: plugin.name.clone(),
                        existing_plugin,
                    };
                    warn!("{}", err);
                    problems.push(err);
                    continue;
                }

                let capabilities = workflow.capabilities();
                debug!(
                    plugin = %plugin.name,
                    workflow = %display_name,
                    ?capabilities,
                    "registered workflow"
                );
                ids.insert(id, plugin.name.clone());
                workflows.insert(
                    display_name.clone(),
                    RegisteredWorkflow {
                        display_name,
                        plugin: plugin.name.clone(),
                        capabilities,
                        workflow,
                    },
                );
            }
        }

        PluginRegistry {
            workflows,
            problems,
        }
    }
}

/// Read-only set of registered workflows plus whatever went wrong building it
pub struct PluginRegistry {
    workflows: BTreeMap<String, RegisteredWorkflow>,
    problems: Vec<PluginDiscoveryError>,
}

impl PluginRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Display name -> workflow, in name order
    pub fn registered_workflows(&self) -> &BTreeMap<String, RegisteredWorkflow> {
        &self.workflows
    }

    /// Look up by display name or workflow id
    pub fn get(&self, key: &str) -> Option<&RegisteredWorkflow> {
        self.workflows
            .get(key)
            .or_else(|| self.workflows.values().find(|w| w.id() == key))
    }

    pub fn problems(&self) -> &[PluginDiscoveryError] {
        &self.problems
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &PluginDiscoveryError> {
        self.problems
            .iter()
            .filter(|p| matches!(p, PluginDiscoveryError::DuplicateWorkflow { .. }))
    }

    /// Fail on any recorded problem instead of carrying on with the rest
    pub fn into_strict(self) -> Result<Self, Vec<PluginDiscoveryError>> {
        if self.problems.is_empty() {
            Ok(self)
        } else {
            Err(self.problems)
        }
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
