use crate::image_reference::ImageReference;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

pub const SERVICE_CA_CONFIGMAP: &str = "openshift-service-ca";
pub const SRIOV_MUTATING_WEBHOOK_NAME: &str = "network-resources-injector-config";
const WEBHOOK_CONFIGMAP_PATH: &str = "./bindata/manifests/webhook/configmap";
const WEBHOOK_SERVICE_PATH: &str = "./bindata/manifests/webhook/service";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub namespace: String,
    #[serde(default = "default_service_ca_configmap")]
    pub service_ca_config_map: String,
    #[serde(default = "default_resync_period_seconds")]
    pub resync_period_seconds: u64,
    #[serde(default)]
    pub watch_all_namespaces: bool,
    #[serde(default)]
    pub apply_strategy: ApplyStrategy,
    #[serde(default)]
    pub webserver: Webserver,
    pub webhook: Webhook,
    #[serde(default)]
    pub manifests: Manifests,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyStrategy {
    /// Plain update (PUT) of every rendered object.
    #[default]
    Update,
    /// Server-side apply, leaving fields owned by other managers untouched.
    ServerSideApply,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Webserver { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default = "default_webhook_name")]
    pub name: String,
    pub injector_image: String,
    pub release_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifests {
    pub config_map_dir: PathBuf,
    pub service_dir: PathBuf,
}

impl Default for Manifests {
    fn default() -> Self {
        Manifests {
            config_map_dir: PathBuf::from(WEBHOOK_CONFIGMAP_PATH),
            service_dir: PathBuf::from(WEBHOOK_SERVICE_PATH),
        }
    }
}

fn default_service_ca_configmap() -> String {
    SERVICE_CA_CONFIGMAP.to_string()
}

fn default_webhook_name() -> String {
    SRIOV_MUTATING_WEBHOOK_NAME.to_string()
}

fn default_resync_period_seconds() -> u64 {
    60
}

impl Config {
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        if self.webhook.release_version.trim().is_empty() {
            anyhow::bail!("webhook.releaseVersion must not be empty");
        }
        if self.resync_period_seconds == 0 {
            anyhow::bail!("resyncPeriodSeconds must be greater than zero");
        }
        let image = ImageReference::parse(&self.webhook.injector_image).with_context(|| {
            format!(
                "Invalid webhook.injectorImage {}",
                self.webhook.injector_image
            )
        })?;
        info!(
            "Using network resources injector image {} from registry {} for release {}",
            image,
            image.registry.as_deref().unwrap_or("<default>"),
            self.webhook.release_version
        );
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Watching ConfigMap {}/{} with apply strategy {:?}",
        config.namespace, config.service_ca_config_map, config.apply_strategy
    );

    Ok(config)
}

/// Replaces `${VAR}` and `${VAR:-default}` placeholders with environment variable values.
/// Returns an error naming every variable that is unset and has no default.
fn expand_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?}")
        .context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match (env::var(var_name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.push(var_name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}
