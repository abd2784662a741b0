use crate::config::ApplyStrategy;
use crate::render::RenderedObject;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::{self, Scope};
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, info};

static FIELD_MANAGER: &str = "sriov-webhook-controller";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Kube(kube::Error::Api(e)) if e.code == 409)
    }
}

/// The cluster operations the reconciler depends on.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClientError>;

    /// Writes a rendered object to the cluster, overwriting its current state.
    async fn update(&self, object: &RenderedObject) -> Result<(), ClientError>;
}

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to namespace {}, Kubernetes API server with version {}.{}",
        client.default_namespace(),
        api_server_info.major,
        api_server_info.minor
    );
    Ok(client)
}

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    default_namespace: String,
    strategy: ApplyStrategy,
}

impl KubeClusterClient {
    pub fn new(client: Client, default_namespace: String, strategy: ApplyStrategy) -> Self {
        Self {
            client,
            default_namespace,
            strategy,
        }
    }

    async fn dynamic_api(&self, object: &RenderedObject) -> Result<Api<DynamicObject>, ClientError> {
        let (resource, capabilities) = discovery::pinned_kind(&self.client, object.gvk()).await?;
        let api = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(
                self.client.clone(),
                object.namespace().unwrap_or(&self.default_namespace),
                &resource,
            ),
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClientError> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(config_maps.get(name).await?)
    }

    async fn update(&self, object: &RenderedObject) -> Result<(), ClientError> {
        let api = self.dynamic_api(object).await?;
        debug!(
            "Updating {} {} with strategy {:?}",
            object.kind(),
            object.name(),
            self.strategy
        );
        match self.strategy {
            ApplyStrategy::Update => {
                api.replace(object.name(), &PostParams::default(), object.object())
                    .await?;
            }
            ApplyStrategy::ServerSideApply => {
                api.patch(
                    object.name(),
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(object.object()),
                )
                .await?;
            }
        }
        Ok(())
    }
}
