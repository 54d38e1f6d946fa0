//! Serving artifact synthesis.
//!
//! Each framework family has a template describing its base image, runtime
//! dependencies and inference entry point. Synthesis combines a template
//! with a deployment and its model into a declarative `ServingArtifact`;
//! user-supplied values only ever land in data fields.

use mlp_models::{
    BuildStep, Deployment, EntryContract, EnvVar, FrameworkFamily,
    ModelDescriptor, ModelMount, ServingArtifact,
};
use std::collections::BTreeMap;
use thiserror::Error;

pub const MODEL_DIR: &str = "/model";
const ENTRY_FILE: &str = "app.py";
const WORKDIR: &str = "/app";
const BASE_DEPENDENCIES: &[&str] = &["fastapi", "uvicorn", "numpy"];
const MAX_REQUIREMENT_LEN: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Unsupported framework: {0}")]
    UnsupportedFramework(String),

    #[error("Invalid requirement specifier: {0:?}")]
    InvalidRequirement(String),

    #[error("Invalid model artifact path: {0:?}")]
    InvalidArtifactPath(String),
}

pub trait ServingTemplate: std::fmt::Debug + Send + Sync {
    fn family(&self) -> FrameworkFamily;
    fn base_image(&self, gpu: bool) -> &'static str;
    fn runtime_dependencies(&self) -> &'static [&'static str];
    /// File name of the model inside `MODEL_DIR`.
    fn model_file(&self) -> &'static str;
    fn entry_source(&self) -> &'static str;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SklearnTemplate;

impl ServingTemplate for SklearnTemplate {
    fn family(&self) -> FrameworkFamily {
        FrameworkFamily::Sklearn
    }
    fn base_image(&self, _gpu: bool) -> &'static str {
        "python:3.10-slim"
    }
    fn runtime_dependencies(&self) -> &'static [&'static str] {
        &["scikit-learn", "joblib"]
    }
    fn model_file(&self) -> &'static str {
        "model.pkl"
    }
    fn entry_source(&self) -> &'static str {
        include_str!("entries/sklearn.py")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PytorchTemplate;

impl ServingTemplate for PytorchTemplate {
    fn family(&self) -> FrameworkFamily {
        FrameworkFamily::Pytorch
    }
    fn base_image(&self, _gpu: bool) -> &'static str {
        "pytorch/pytorch:latest"
    }
    // torch ships with the base image
    fn runtime_dependencies(&self) -> &'static [&'static str] {
        &[]
    }
    fn model_file(&self) -> &'static str {
        "model.pt"
    }
    fn entry_source(&self) -> &'static str {
        include_str!("entries/pytorch.py")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TensorflowTemplate;

impl ServingTemplate for TensorflowTemplate {
    fn family(&self) -> FrameworkFamily {
        FrameworkFamily::Tensorflow
    }
    fn base_image(&self, gpu: bool) -> &'static str {
        if gpu {
            "tensorflow/tensorflow:latest-gpu"
        } else {
            "tensorflow/tensorflow:latest"
        }
    }
    fn runtime_dependencies(&self) -> &'static [&'static str] {
        &[]
    }
    fn model_file(&self) -> &'static str {
        "model.h5"
    }
    fn entry_source(&self) -> &'static str {
        include_str!("entries/tensorflow.py")
    }
}

/// Container name of a deployment's serving process.
pub fn service_name(deployment_id: &str) -> String {
    format!("deployment-{deployment_id}")
}

pub fn template_for(family: FrameworkFamily) -> &'static dyn ServingTemplate {
    match family {
        FrameworkFamily::Sklearn => &SklearnTemplate,
        FrameworkFamily::Pytorch => &PytorchTemplate,
        FrameworkFamily::Tensorflow => &TensorflowTemplate,
    }
}

/// pip requirement specifier: a package name optionally followed by extras
/// and version constraints. No options, URLs, paths or whitespace.
pub fn validate_requirement(req: &str) -> Result<(), SynthesisError> {
    let ok = !req.is_empty()
        && req.len() <= MAX_REQUIREMENT_LEN
        && req.starts_with(|c: char| c.is_ascii_alphanumeric())
        && req.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '.' | '_' | '-' | '[' | ']' | ',' | '<' | '>' | '=' | '!' | '~' | '*')
        });
    if ok {
        Ok(())
    } else {
        Err(SynthesisError::InvalidRequirement(req.to_string()))
    }
}

fn validate_artifact_path(path: &str) -> Result<(), SynthesisError> {
    let ok = path.starts_with('/')
        && !path.split('/').any(|seg| seg == "..")
        && !path.chars().any(|c| c == ':' || c == ',' || c.is_control());
    if ok {
        Ok(())
    } else {
        Err(SynthesisError::InvalidArtifactPath(path.to_string()))
    }
}

/// Build the serving artifact for `deployment` running `model`.
pub fn synthesize(
    deployment: &Deployment,
    model: &ModelDescriptor,
) -> Result<ServingArtifact, SynthesisError> {
    let family: FrameworkFamily = model
        .framework
        .parse()
        .map_err(|_| SynthesisError::UnsupportedFramework(model.framework.clone()))?;
    let template = template_for(family);
    validate_artifact_path(&model.artifact_path)?;

    let mut dependencies: Vec<String> = BASE_DEPENDENCIES
        .iter()
        .chain(template.runtime_dependencies())
        .map(|d| d.to_string())
        .collect();
    for req in &model.requirements {
        let req = req.trim();
        validate_requirement(req)?;
        if !dependencies.iter().any(|d| d == req) {
            dependencies.push(req.to_string());
        }
    }

    let contract = EntryContract::default();
    let model_target = format!("{MODEL_DIR}/{}", template.model_file());
    let gpu = deployment.wants_gpu();

    let mut labels = BTreeMap::new();
    labels.insert("mlp.deployment".to_string(), deployment.id.clone());
    labels.insert("mlp.owner".to_string(), deployment.owner_id.clone());
    labels.insert("mlp.model".to_string(), model.id.clone());
    labels.insert("mlp.framework".to_string(), family.as_str().to_string());

    Ok(ServingArtifact {
        name: service_name(&deployment.id),
        image_tag: format!("mlp-serving/{}:latest", deployment.id),
        family,
        base_image: template.base_image(gpu).to_string(),
        gpu,
        dependencies,
        build_steps: vec![
            BuildStep::Workdir { path: WORKDIR.into() },
            BuildStep::InstallRequirements,
            BuildStep::CopyEntry {
                path: ENTRY_FILE.into(),
            },
            BuildStep::Volume {
                path: MODEL_DIR.into(),
            },
            BuildStep::Expose {
                port: contract.port,
            },
            BuildStep::Cmd {
                argv: vec!["python".into(), ENTRY_FILE.into()],
            },
        ],
        entry_file: ENTRY_FILE.into(),
        entry_source: template.entry_source().to_string(),
        env: vec![
            EnvVar::new("MODEL_PATH", model_target.clone()),
            EnvVar::new("MODEL_TYPE", family.as_str()),
        ],
        model_mount: ModelMount {
            source: model.artifact_path.clone(),
            target: model_target,
            read_only: true,
        },
        contract,
        labels,
    })
}
