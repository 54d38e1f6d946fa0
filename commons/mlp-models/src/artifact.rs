//! Declarative description of a model-serving container.
//!
//! A runtime turns this into whatever its build system needs. Nothing in here
//! is a template: user supplied values only appear as data fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::enums::FrameworkFamily;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BuildStep {
    Workdir { path: String },
    /// Install every entry of `ServingArtifact::dependencies`.
    InstallRequirements,
    /// Place `ServingArtifact::entry_source` at `path`.
    CopyEntry { path: String },
    Volume { path: String },
    Expose { port: u16 },
    Cmd { argv: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Host artifact mounted into the serving container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// What the running service promises to expose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryContract {
    pub port: u16,
    pub health_path: String,
    pub predict_path: String,
    pub input_field: String,
    pub output_field: String,
}

impl Default for EntryContract {
    fn default() -> Self {
        Self {
            port: 8000,
            health_path: "/health".into(),
            predict_path: "/predict".into(),
            input_field: "features".into(),
            output_field: "prediction".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServingArtifact {
    /// Container name for the service.
    pub name: String,
    pub image_tag: String,
    pub family: FrameworkFamily,
    pub base_image: String,
    /// Request GPU devices for the container.
    pub gpu: bool,
    pub dependencies: Vec<String>,
    pub build_steps: Vec<BuildStep>,
    pub entry_file: String,
    pub entry_source: String,
    pub env: Vec<EnvVar>,
    pub model_mount: ModelMount,
    pub contract: EntryContract,
    pub labels: BTreeMap<String, String>,
}

impl ServingArtifact {
    /// Dependency manifest in pip requirements format.
    pub fn requirements_manifest(&self) -> String {
        let mut out = String::new();
        for dep in &self.dependencies {
            out.push_str(dep);
            out.push('\n');
        }
        out
    }
}
