//! Domain events carried on the dev session bus.
//!
//! Kind names are part of the wire protocol: remote clients build their
//! [`tether_bus::TypeRegistry`] from the same constants.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tether_bus::Event;
use tether_runtime::Diagnostic;

/// A locally run dev command declared by a deployed component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dev {
    pub name: String,
    pub command: String,
    /// Relative to the session's working directory
    pub directory: String,
    pub autostart: bool,
    /// Names of the links the command can access
    pub links: Vec<String>,
    pub title: String,
    pub environment: BTreeMap<String, String>,
}

/// A linkable resource's exported properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    pub properties: serde_json::Map<String, Value>,
    pub include: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunnel {
    pub ip: String,
    pub username: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    pub subnets: Vec<String>,
}

/// A resource that failed to deploy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployError {
    pub message: String,
    #[serde(rename = "URN")]
    pub urn: String,
}

/// Outcome of a deployment; the last one is replayed to new stream clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteEvent {
    #[serde(rename = "updateID")]
    pub update_id: String,
    pub links: BTreeMap<String, Link>,
    pub devs: BTreeMap<String, Dev>,
    pub tasks: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    pub hints: BTreeMap<String, String>,
    pub tunnels: BTreeMap<String, Tunnel>,
    pub errors: Vec<DeployError>,
    pub finished: bool,
    /// Loaded from a previous run rather than a fresh deploy
    pub old: bool,
    pub versions: BTreeMap<String, i64>,
}

impl Event for CompleteEvent {
    const KIND: &'static str = "project.CompleteEvent";
}

/// Someone asked the session to deploy again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequestedEvent {}

impl Event for DeployRequestedEvent {
    const KIND: &'static str = "deployer.DeployRequestedEvent";
}

/// A watched file was created, modified or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangedEvent {
    pub path: PathBuf,
}

impl Event for FileChangedEvent {
    const KIND: &'static str = "watcher.FileChangedEvent";
}

/// A function finished building, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBuildEvent {
    pub function_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Diagnostic>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Event for FunctionBuildEvent {
    const KIND: &'static str = "runtime.FunctionBuildEvent";
}

/// One line written by a running worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionLogEvent {
    pub function_id: String,
    pub worker_id: String,
    /// `stdout` or `stderr`
    pub stream: String,
    pub line: String,
}

impl Event for FunctionLogEvent {
    const KIND: &'static str = "runtime.FunctionLogEvent";
}
