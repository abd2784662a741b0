//! Manifest rendering.
//!
//! Every `*.yaml`, `*.yml` and `*.json` file below a manifest directory is a
//! minijinja template. Rendered files may contain several YAML documents, each
//! of which becomes one [`RenderedObject`].

use base64::{Engine, engine::general_purpose::STANDARD};
use globset::{Glob, GlobSet, GlobSetBuilder};
use kube::api::{DynamicObject, GroupVersionKind};
use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const MANIFEST_PATTERNS: [&str; 3] = ["*.yaml", "*.yml", "*.json"];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read manifest directory {}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read manifest {}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render template {}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to parse rendered manifest {}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("invalid object in {}: {reason}", path.display())]
    InvalidObject { path: PathBuf, reason: String },
    #[error("invalid manifest file pattern")]
    Pattern(#[from] globset::Error),
}

/// Values substituted into manifest templates.
#[derive(Debug, Clone, Default)]
pub struct RenderData {
    data: BTreeMap<String, Value>,
}

impl RenderData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.data.insert(key.into(), Value::from(value.into()));
        self
    }

    pub fn insert_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.data
            .insert(key.into(), Value::from_bytes(value.into()));
        self
    }

    fn to_value(&self) -> Value {
        Value::from_iter(self.data.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

/// A manifest document produced by the renderer, ready to be sent to the cluster.
#[derive(Debug, Clone)]
pub struct RenderedObject {
    gvk: GroupVersionKind,
    object: DynamicObject,
}

impl RenderedObject {
    fn from_document(value: serde_json::Value, path: &Path) -> Result<Self, RenderError> {
        let invalid = |reason: &str| RenderError::InvalidObject {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("missing apiVersion"))?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("missing kind"))?;
        if value.pointer("/metadata/name").and_then(|v| v.as_str()).is_none() {
            return Err(invalid("missing metadata.name"));
        }

        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);

        let object: DynamicObject = serde_json::from_value(value)
            .map_err(|e| invalid(&format!("not a Kubernetes object: {}", e)))?;

        Ok(Self { gvk, object })
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    pub fn object(&self) -> &DynamicObject {
        &self.object
    }
}

/// Renders every manifest template below `dir`, in path order.
pub fn render_dir(dir: &Path, data: &RenderData) -> Result<Vec<RenderedObject>, RenderError> {
    let patterns = manifest_patterns()?;
    let mut files = Vec::new();
    collect_files(dir, &patterns, &mut files)?;
    files.sort();

    let env = template_environment();
    let ctx = data.to_value();

    let mut objects = Vec::new();
    for path in files {
        objects.extend(render_file(&env, &path, &ctx)?);
    }
    debug!(
        "Rendered {} objects from manifest directory {}",
        objects.len(),
        dir.display()
    );
    Ok(objects)
}

fn render_file(
    env: &Environment<'_>,
    path: &Path,
    ctx: &Value,
) -> Result<Vec<RenderedObject>, RenderError> {
    let source = fs::read_to_string(path).map_err(|source| RenderError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let rendered = env
        .render_str(&source, ctx)
        .map_err(|source| RenderError::Template {
            path: path.to_path_buf(),
            source,
        })?;

    let mut objects = Vec::new();
    for document in serde_yaml_ng::Deserializer::from_str(&rendered) {
        let value = serde_json::Value::deserialize(document).map_err(|source| RenderError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        objects.push(RenderedObject::from_document(value, path)?);
    }
    Ok(objects)
}

fn collect_files(dir: &Path, patterns: &GlobSet, files: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let read_dir_error = |source| RenderError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        // Symlinked directories are not followed
        let file_type = entry.file_type().map_err(read_dir_error)?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(&path, patterns, files)?;
        } else if (!file_type.is_symlink() || path.is_file())
            && path.file_name().is_some_and(|name| patterns.is_match(name))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn manifest_patterns() -> Result<GlobSet, RenderError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in MANIFEST_PATTERNS {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("b64enc", b64enc);
    env
}

/// Base64 encode filter for strings and byte values
///
/// Usage: `{{ CA_BUNDLE | b64enc }}`
fn b64enc(value: Value) -> Result<String, minijinja::Error> {
    value
        .as_bytes()
        .map(|bytes| STANDARD.encode(bytes))
        .ok_or_else(|| {
            minijinja::Error::new(
                ErrorKind::InvalidOperation,
                "b64enc expects a string or bytes",
            )
        })
}
