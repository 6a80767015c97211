//! Plugin registration seen through the runtime

use std::collections::BTreeMap;
use std::sync::Arc;

use speedwagon::workflows::{builtin_plugin, FileInventory, BUILTIN_PLUGIN};
use speedwagon::{InProcessRuntime, Plugin, PluginRegistry};
use speedwagon_sdk::{JobRuntime, PluginDiscoveryError, Workflow};

fn shadowing_plugin() -> Plugin {
    Plugin::new("shadow", || {
        let mut workflows: BTreeMap<String, Arc<dyn Workflow>> = BTreeMap::new();
        workflows.insert("File Inventory".to_string(), Arc::new(FileInventory));
        Ok(workflows)
    })
}

#[test]
fn test_builtin_workflows_are_listed() {
    let runtime = InProcessRuntime::new(PluginRegistry::builder().plugin(builtin_plugin()).build());
    let listed = runtime.list_workflows();

    let names: Vec<&str> = listed.iter().map(|w| w.metadata.name.as_str()).collect();
    assert_eq!(names, vec!["File Inventory", "Generate Checksum Manifest"]);
    assert!(listed.iter().all(|w| w.plugin == BUILTIN_PLUGIN));

    let checksum = runtime.get_workflow_metadata("checksum_manifest").unwrap();
    assert!(checksum.capabilities.initial_task);
    assert!(checksum.capabilities.additional_info);
    assert!(checksum.capabilities.report);
    assert_eq!(checksum.options.len(), 2);

    let inventory = runtime.get_workflow_metadata("file_inventory").unwrap();
    assert!(!inventory.capabilities.additional_info);
}

#[test]
fn test_same_name_from_two_plugins_is_flagged() {
    let registry = PluginRegistry::builder()
        .plugin(builtin_plugin())
        .plugin(shadowing_plugin())
        .build();

    assert_eq!(registry.get("File Inventory").unwrap().plugin, BUILTIN_PLUGIN);
    assert_eq!(
        registry.conflicts().collect::<Vec<_>>(),
        vec![&PluginDiscoveryError::DuplicateWorkflow {
            workflow: "File Inventory".to_string(),
            plugin: "shadow".to_string(),
            existing_plugin: BUILTIN_PLUGIN.to_string(),
        }]
    );

    let problems = registry.into_strict().err().unwrap();
    assert_eq!(problems.len(), 1);
}

#[test]
fn test_disabling_builtin_leaves_other_plugins() {
    let registry = PluginRegistry::builder()
        .plugin(builtin_plugin())
        .plugin(shadowing_plugin())
        .disable([BUILTIN_PLUGIN])
        .build();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("file_inventory").unwrap().plugin, "shadow");
    assert!(registry.problems().is_empty());
}

#[test]
fn test_renamed_copy_cannot_take_over_an_id() {
    let renamed = Plugin::new("shadow", || {
        let mut workflows: BTreeMap<String, Arc<dyn Workflow>> = BTreeMap::new();
        workflows.insert("Alpha Inventory".to_string(), Arc::new(FileInventory));
        Ok(workflows)
    });
    let runtime = InProcessRuntime::new(
        PluginRegistry::builder()
            .plugin(builtin_plugin())
            .plugin(renamed)
            .build(),
    );

    let inventory = runtime.get_workflow_metadata("file_inventory").unwrap();
    assert_eq!(inventory.plugin, BUILTIN_PLUGIN);
    assert_eq!(inventory.metadata.name, "File Inventory");
    assert_eq!(runtime.list_workflows().len(), 2);
    assert_eq!(
        runtime.registry().conflicts().collect::<Vec<_>>(),
        vec![&PluginDiscoveryError::DuplicateWorkflow {
            workflow: "file_inventory".to_string(),
            plugin: "shadow".to_string(),
            existing_plugin: BUILTIN_PLUGIN.to_string(),
        }]
    );
}
