use mlp_models::{BuildStep, ServingArtifact};

use crate::error::{RuntimeError, RuntimeResult};

const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Render the Dockerfile for an artifact's build steps.
pub fn render_dockerfile(artifact: &ServingArtifact) -> RuntimeResult<String> {
    let mut lines = vec![format!("FROM {}", artifact.base_image)];
    for step in &artifact.build_steps {
        match step {
            BuildStep::Workdir { path } => lines.push(format!("WORKDIR {path}")),
            BuildStep::InstallRequirements => {
                lines.push(format!("COPY {REQUIREMENTS_FILE} ./{REQUIREMENTS_FILE}"));
                lines.push(format!(
                    "RUN pip install --no-cache-dir -r {REQUIREMENTS_FILE}"
                ));
            }
            BuildStep::CopyEntry { path } => {
                lines.push(format!("COPY {} {path}", artifact.entry_file))
            }
            BuildStep::Volume { path } => {
                lines.push(format!("VOLUME {}", json_array(&[path.as_str()])?))
            }
            BuildStep::Expose { port } => lines.push(format!("EXPOSE {port}")),
            BuildStep::Cmd { argv } => {
                let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
                lines.push(format!("CMD {}", json_array(&argv)?));
            }
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

fn json_array(items: &[&str]) -> RuntimeResult<String> {
    serde_json::to_string(items).map_err(|e| RuntimeError::Invalid(e.to_string()))
}

/// Tar archive holding the Dockerfile, dependency manifest and entry point.
pub fn build_context(artifact: &ServingArtifact) -> RuntimeResult<Vec<u8>> {
    let dockerfile = render_dockerfile(artifact)?;
    let manifest = artifact.requirements_manifest();
    let files: [(&str, &[u8]); 3] = [
        ("Dockerfile", dockerfile.as_bytes()),
        (REQUIREMENTS_FILE, manifest.as_bytes()),
        (artifact.entry_file.as_str(), artifact.entry_source.as_bytes()),
    ];
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, name, data)
            .map_err(|e| RuntimeError::Build(format!("build context: {e}")))?;
    }
    builder
        .into_inner()
        .map_err(|e| RuntimeError::Build(format!("build context: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlp_models::{EntryContract, FrameworkFamily, ModelMount};
    use std::collections::BTreeMap;
    use std::io::Read;

    fn artifact() -> ServingArtifact {
        ServingArtifact {
            name: "deployment-d1".into(),
            image_tag: "mlp-serving/d1:latest".into(),
            family: FrameworkFamily::Sklearn,
            base_image: "python:3.10-slim".into(),
            gpu: false,
            dependencies: vec!["fastapi".into(), "scikit-learn==1.4.2".into()],
            build_steps: vec![
                BuildStep::Workdir { path: "/app".into() },
                BuildStep::InstallRequirements,
                BuildStep::CopyEntry { path: "app.py".into() },
                BuildStep::Volume { path: "/model".into() },
                BuildStep::Expose { port: 8000 },
                BuildStep::Cmd {
                    argv: vec!["python".into(), "app.py".into()],
                },
            ],
            entry_file: "app.py".into(),
            entry_source: "print('hi')\n".into(),
            env: vec![],
            model_mount: ModelMount {
                source: "/srv/models/m1.pkl".into(),
                target: "/model/model.pkl".into(),
                read_only: true,
            },
            contract: EntryContract::default(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn dockerfile_follows_steps() {
        let df = render_dockerfile(&artifact()).unwrap();
        let lines: Vec<&str> = df.lines().collect();
        assert_eq!(lines[0], "FROM python:3.10-slim");
        assert_eq!(lines[1], "WORKDIR /app");
        assert!(lines.contains(&"RUN pip install --no-cache-dir -r requirements.txt"));
        assert!(lines.contains(&"VOLUME [\"/model\"]"));
        assert!(lines.contains(&"EXPOSE 8000"));
        assert_eq!(*lines.last().unwrap(), "CMD [\"python\",\"app.py\"]");
    }

    #[test]
    fn context_contains_all_files() {
        let bytes = build_context(&artifact()).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut seen = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().display().to_string();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.insert(name, body);
        }
        assert_eq!(seen["requirements.txt"], "fastapi\nscikit-learn==1.4.2\n");
        assert_eq!(seen["app.py"], "print('hi')\n");
        assert!(seen["Dockerfile"].starts_with("FROM "));
    }
}
