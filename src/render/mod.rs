//! Manifest rendering
//!
//! Renders the on-disk manifest template directory into typed-erased
//! Kubernetes objects. Templates use default Jinja delimiters with strict
//! undefined handling: a binding the configuration forgot to provide is a
//! render error, not an empty string in a live manifest.

use std::fs;
use std::path::{Path, PathBuf};

use kube::core::DynamicObject;
use minijinja::{Environment, UndefinedBehavior};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::config::RenderData;
use crate::{Error, Result};

/// Renders manifest templates into Kubernetes objects
pub struct ManifestRenderer {
    env: Environment<'static>,
}

impl Default for ManifestRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestRenderer {
    /// Create a renderer with strict undefined-variable handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Render every `.yaml`/`.yml` template under `dir` against `data`,
    /// in lexical filename order, and parse the results into objects.
    ///
    /// Each file may hold multiple YAML documents; empty documents are
    /// skipped. The returned order is the apply order.
    pub fn render_dir(&self, dir: &Path, data: &RenderData) -> Result<Vec<DynamicObject>> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| Error::render(format!("failed to read manifest dir {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut objects = Vec::new();
        for path in files {
            let template = fs::read_to_string(&path).map_err(|e| {
                Error::render(format!("failed to read manifest {}: {e}", path.display()))
            })?;
            let rendered = self.env.render_str(&template, data).map_err(|e| {
                Error::render(format!("failed to render manifest {}: {e}", path.display()))
            })?;
            let count = objects.len();
            parse_documents(&rendered, &mut objects).map_err(|e| {
                Error::render(format!("failed to parse manifest {}: {e}", path.display()))
            })?;
            debug!(
                manifest = %path.display(),
                objects = objects.len() - count,
                "Rendered manifest"
            );
        }
        Ok(objects)
    }
}

fn parse_documents(rendered: &str, out: &mut Vec<DynamicObject>) -> serde_yaml::Result<()> {
    for doc in serde_yaml::Deserializer::from_str(rendered) {
        let value = Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        out.push(serde_yaml::from_value(value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::build_render_data;
    use crate::crd::{AntreaInstallSpec, Platform};
    use std::io::Write;

    fn sample_data() -> RenderData {
        let config = AntreaInstallSpec {
            antrea_agent_config: "serviceCIDR: 10.96.0.0/12\n".to_string(),
            antrea_cni_config: String::new(),
            antrea_controller_config: String::new(),
            antrea_image: "antrea/antrea-ubuntu:v0.9.1".to_string(),
            antrea_platform: Platform::Kubernetes,
        };
        build_render_data(None, &config)
    }

    fn write_manifest(dir: &Path, name: &str, content: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_renders_in_filename_order_with_bindings() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "002-deployment.yaml",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: antrea-controller\nspec:\n  template:\n    spec:\n      containers:\n      - image: {{ AntreaImage }}\n",
        );
        write_manifest(
            dir.path(),
            "001-configmap.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: antrea-config\n",
        );
        write_manifest(dir.path(), "notes.txt", "not a manifest");

        let renderer = ManifestRenderer::new();
        let objects = renderer.render_dir(dir.path(), &sample_data()).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].metadata.name.as_deref(), Some("antrea-config"));
        assert_eq!(
            objects[1].metadata.name.as_deref(),
            Some("antrea-controller")
        );
        let rendered = serde_json::to_string(&objects[1]).unwrap();
        assert!(rendered.contains("antrea/antrea-ubuntu:v0.9.1"));
    }

    #[test]
    fn test_multi_document_files_and_empty_documents() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "bundle.yml",
            "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: antrea-agent\n---\n---\napiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: antrea-controller\n",
        );

        let renderer = ManifestRenderer::new();
        let objects = renderer.render_dir(dir.path(), &sample_data()).unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_undefined_binding_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "bad.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ NoSuchBinding }}\n",
        );

        let renderer = ManifestRenderer::new();
        let err = renderer.render_dir(dir.path(), &sample_data()).unwrap_err();
        assert!(err.to_string().contains("failed to render manifest"));
    }

    #[test]
    fn test_missing_directory_is_a_render_error() {
        let renderer = ManifestRenderer::new();
        let err = renderer
            .render_dir(Path::new("/no/such/dir"), &sample_data())
            .unwrap_err();
        assert!(err.to_string().contains("failed to read manifest dir"));
    }
}
