use crate::client::KubeClusterClient;
use crate::reconciler::Reconciler;
use crate::webserver::HealthState;
use std::sync::Arc;
use std::time::Duration;

pub struct ControllerContext {
    pub(crate) reconciler: Reconciler<KubeClusterClient>,
    pub(crate) resync_period: Duration,
    pub(crate) health: Arc<HealthState>,
}
