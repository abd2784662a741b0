use crate::reconciler::{Error, Outcome, ReconcileRequest};
use crate::state::ControllerContext;
use crate::webserver::HealthState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::Action;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, ResourceExt};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Watches ConfigMaps and reconciles the webhook manifests until a shutdown signal arrives.
pub async fn run(client: Client, ctx: Arc<ControllerContext>) {
    let config = ctx.reconciler.config();
    let config_maps: Api<ConfigMap> = if config.watch_all_namespaces {
        info!("Watching ConfigMaps in all namespaces");
        Api::all(client)
    } else {
        info!("Watching ConfigMaps in namespace {}", config.namespace);
        Api::namespaced(client, &config.namespace)
    };

    let health = ctx.health.clone();
    Controller::new(config_maps, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            report(&health, result);
            futures::future::ready(())
        })
        .await;
    info!("ConfigMap controller stopped");
}

/// Logs a controller result and marks the controller ready on the first reconciled object.
fn report<T: Display, E: Display>(health: &HealthState, result: Result<(T, Action), E>) {
    match result {
        Ok((object, _)) => {
            if !health.is_ready() {
                info!("ConfigMap watch is delivering events, marking controller ready");
                health.mark_ready();
            }
            debug!("Reconciled {}", object);
        }
        Err(e) => warn!("Reconciliation failed: {}", e),
    }
}

fn reconcile_request(config_map: &ConfigMap) -> ReconcileRequest {
    ReconcileRequest {
        namespace: config_map.namespace().unwrap_or_default(),
        name: config_map.name_any(),
    }
}

async fn reconcile(config_map: Arc<ConfigMap>, ctx: Arc<ControllerContext>) -> Result<Action, Error> {
    let request = reconcile_request(&config_map);
    let outcome = ctx.reconciler.reconcile(&request).await?;
    Ok(requeue_action(outcome))
}

/// Successful reconciles wait for the next ConfigMap event; nothing is re-applied on a timer.
fn requeue_action(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Applied { objects } => {
            debug!("Applied {} objects, waiting for the next change", objects);
            Action::await_change()
        }
        Outcome::Ignored | Outcome::NotReady => Action::await_change(),
    }
}

fn error_policy(config_map: Arc<ConfigMap>, error: &Error, ctx: Arc<ControllerContext>) -> Action {
    let request = reconcile_request(&config_map);
    warn!(
        "Reconcile of ConfigMap {}/{} failed, retrying in {:?}: {:?}",
        request.namespace, request.name, ctx.resync_period, error
    );
    Action::requeue(ctx.resync_period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    #[test]
    fn test_reconcile_request_from_config_map() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("openshift-service-ca".to_string()),
                namespace: Some("openshift-sriov-network-operator".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            reconcile_request(&config_map),
            ReconcileRequest {
                namespace: "openshift-sriov-network-operator".to_string(),
                name: "openshift-service-ca".to_string(),
            }
        );
    }

    #[test]
    fn test_successful_reconcile_waits_for_next_change() {
        assert_eq!(
            requeue_action(Outcome::Applied { objects: 4 }),
            Action::await_change()
        );
        assert_eq!(requeue_action(Outcome::Ignored), Action::await_change());
        assert_eq!(requeue_action(Outcome::NotReady), Action::await_change());
    }

    #[test]
    fn test_failing_watch_keeps_controller_unready() {
        let health = HealthState::default();

        report::<&str, &str>(&health, Err("configmaps is forbidden"));
        report::<&str, &str>(&health, Err("configmaps is forbidden"));
        assert!(!health.is_ready());

        report::<&str, &str>(
            &health,
            Ok(("ConfigMap.v1./openshift-service-ca.sriov", Action::await_change())),
        );
        assert!(health.is_ready());
    }
}
