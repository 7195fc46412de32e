#[path = "e2e/scenarios.rs"]
mod scenarios;

#[path = "e2e/component_lifecycle.rs"]
mod component_lifecycle;

#[path = "e2e/security_gate.rs"]
mod security_gate;

#[path = "e2e/module_files.rs"]
mod module_files;
