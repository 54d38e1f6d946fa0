use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotebookStatus {
    Creating,
    Running,
    Stopping,
    Stopped,
    Failed,
    Deleted,
}

impl NotebookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// States in which a runtime operation is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Creating | Self::Stopping)
    }
}

impl Default for NotebookStatus {
    fn default() -> Self {
        Self::Creating
    }
}

impl fmt::Display for NotebookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Deploying,
    Running,
    Stopped,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl Default for DeploymentStatus {
    fn default() -> Self {
        Self::Deploying
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Training,
    Ready,
    Failed,
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self::Training
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Training => "training",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum UsageResourceType {
    NotebookRuntime,
    ApiCall,
    Storage,
}

impl UsageResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotebookRuntime => "notebook_runtime",
            Self::ApiCall => "api_call",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for UsageResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model framework families that have a serving entry point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkFamily {
    Sklearn,
    Pytorch,
    Tensorflow,
}

impl FrameworkFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sklearn => "sklearn",
            Self::Pytorch => "pytorch",
            Self::Tensorflow => "tensorflow",
        }
    }
}

impl std::str::FromStr for FrameworkFamily {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sklearn" | "scikit-learn" | "joblib" => Ok(Self::Sklearn),
            "pytorch" | "torch" => Ok(Self::Pytorch),
            "tensorflow" | "keras" => Ok(Self::Tensorflow),
            _ => Err(UnknownVariant {
                kind: "framework",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FrameworkFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_aliases_parse() {
        assert_eq!(
            "joblib".parse::<FrameworkFamily>(),
            Ok(FrameworkFamily::Sklearn)
        );
        assert_eq!(
            "Torch".parse::<FrameworkFamily>(),
            Ok(FrameworkFamily::Pytorch)
        );
        assert_eq!(
            " keras ".parse::<FrameworkFamily>(),
            Ok(FrameworkFamily::Tensorflow)
        );
        assert!("xgboost".parse::<FrameworkFamily>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let v = serde_json::to_value(NotebookStatus::Stopping).unwrap();
        assert_eq!(v, "stopping");
        let v = serde_json::to_value(UsageResourceType::NotebookRuntime).unwrap();
        assert_eq!(v, "notebook_runtime");
    }
}
