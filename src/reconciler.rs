use crate::client::{ClientError, ClusterClient};
use crate::config::Config;
use crate::render::{self, RenderData, RenderError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const SERVICE_CA_KEY: &str = "service-ca.crt";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to get ConfigMap {namespace}/{name}")]
    FetchConfigMap {
        namespace: String,
        name: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to render webhook manifests from {}", dir.display())]
    Render {
        dir: PathBuf,
        #[source]
        source: RenderError,
    },
    #[error("failed to update {kind} {name}")]
    Update {
        kind: String,
        name: String,
        #[source]
        source: ClientError,
    },
}

/// Identity of the object an event was raised for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was not for the service CA ConfigMap.
    Ignored,
    /// The service CA ConfigMap has no CA bundle yet.
    NotReady,
    Applied { objects: usize },
}

/// Keeps the injector webhook manifests in sync with the service CA bundle.
pub struct Reconciler<C> {
    client: C,
    config: Config,
}

impl<C: ClusterClient> Reconciler<C> {
    pub fn new(client: C, config: Config) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Outcome, Error> {
        if request.namespace != self.config.namespace
            || request.name != self.config.service_ca_config_map
        {
            debug!(
                "Ignoring ConfigMap {}/{}",
                request.namespace, request.name
            );
            return Ok(Outcome::Ignored);
        }
        info!(
            "Reconciling SR-IOV webhook for ConfigMap {}/{}",
            request.namespace, request.name
        );

        let ca_config_map = self
            .client
            .get_config_map(&request.namespace, &request.name)
            .await
            .map_err(|source| {
                if source.is_not_found() {
                    warn!(
                        "CA bundle ConfigMap {}/{} disappeared before it could be read",
                        request.namespace, request.name
                    );
                } else {
                    error!(
                        "Couldn't get CA bundle ConfigMap {}/{}: {}",
                        request.namespace, request.name, source
                    );
                }
                Error::FetchConfigMap {
                    namespace: request.namespace.clone(),
                    name: request.name.clone(),
                    source,
                }
            })?;

        let Some(ca_bundle) = ca_config_map
            .data
            .as_ref()
            .and_then(|data| data.get(SERVICE_CA_KEY))
        else {
            info!(
                "ConfigMap {}/{} has no {} yet, skipping",
                request.namespace, request.name, SERVICE_CA_KEY
            );
            return Ok(Outcome::NotReady);
        };

        let mut data = RenderData::new();
        data.insert("Namespace", self.config.namespace.as_str())
            .insert("ServiceCAConfigMap", self.config.service_ca_config_map.as_str());
        let mut applied = self.apply(&self.config.manifests.config_map_dir, &data).await?;

        let webhook = &self.config.webhook;
        let mut data = RenderData::new();
        data.insert("Namespace", self.config.namespace.as_str())
            .insert("SRIOVMutatingWebhookName", webhook.name.as_str())
            .insert("NetworkResourcesInjectorImage", webhook.injector_image.as_str())
            .insert("ReleaseVersion", webhook.release_version.as_str())
            .insert_bytes("CA_BUNDLE", ca_bundle.as_bytes());
        applied += self.apply(&self.config.manifests.service_dir, &data).await?;

        info!(
            "Updated {} webhook objects for CA bundle from {}/{}",
            applied, request.namespace, request.name
        );
        Ok(Outcome::Applied { objects: applied })
    }

    /// Renders `manifest_dir` and updates every object in order, stopping at the first failure.
    async fn apply(&self, manifest_dir: &Path, data: &RenderData) -> Result<usize, Error> {
        let objects = render::render_dir(manifest_dir, data).map_err(|source| {
            error!(
                "Failed to render webhook manifests from {}: {}",
                manifest_dir.display(),
                source
            );
            Error::Render {
                dir: manifest_dir.to_path_buf(),
                source,
            }
        })?;

        for object in &objects {
            self.client.update(object).await.map_err(|source| {
                if source.is_conflict() {
                    warn!(
                        "{} {} was modified concurrently, will retry",
                        object.kind(),
                        object.name()
                    );
                } else {
                    error!(
                        "Couldn't update {} {}: {}",
                        object.kind(),
                        object.name(),
                        source
                    );
                }
                Error::Update {
                    kind: object.kind().to_string(),
                    name: object.name().to_string(),
                    source,
                }
            })?;
            debug!("Updated {} {}", object.kind(), object.name());
        }
        Ok(objects.len())
    }
}
