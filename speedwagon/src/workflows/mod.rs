//! Workflows that ship with speedwagon

pub mod checksum_manifest;
pub mod file_inventory;

pub use checksum_manifest::{ChecksumManifest, ChecksumOptions};
pub use file_inventory::{FileInventory, FileInventoryOptions};

use std::collections::BTreeMap;
use std::sync::Arc;

use speedwagon_sdk::Workflow;

use crate::registry::Plugin;

pub const BUILTIN_PLUGIN: &str = "builtin";

/// The built-in workflows as a plugin, keyed by display name
pub fn builtin_plugin() -> Plugin {
    Plugin::new(BUILTIN_PLUGIN, || {
        let mut workflows: BTreeMap<String, Arc<dyn Workflow>> = BTreeMap::new();
        for workflow in [
            Arc::new(FileInventory) as Arc<dyn Workflow>,
            Arc::new(ChecksumManifest) as Arc<dyn Workflow>,
        ] {
            workflows.insert(workflow.metadata().name, workflow);
        }
        Ok(workflows)
    })
}
