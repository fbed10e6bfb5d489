//! Watch-driven runtime: one `kube` controller for Tables, one for worker
//! Pods, both feeding the [`Dispatcher`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use tablewright_core::jobs::ROLE_LABEL;
use tablewright_core::{OperatorConfig, Table};
use tablewright_store::{KubeStore, ObjectKey, ResourceStore};

use crate::dispatcher::{Dispatcher, ReconcileOutcome};
use crate::error::ControllerError;

/// Shared state handed to every reconciliation.
pub struct Context {
    dispatcher: Dispatcher,
    error_backoff: Duration,
}

impl Context {
    pub fn new(store: Arc<dyn ResourceStore>, config: &OperatorConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(store, config),
            error_backoff: config.error_backoff(),
        }
    }
}

/// Run both controllers until Ctrl-C / SIGTERM.
pub async fn run(client: Client, config: OperatorConfig) {
    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(store, &config));

    let (tables, pods): (Api<Table>, Api<Pod>) = match config.namespace.as_deref() {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        worker_image = %config.worker_image,
        "starting table and pod controllers"
    );

    let table_controller = Controller::new(tables, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_table, error_policy::<Table>, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(table = %obj.name, ?action, "table reconciled"),
                Err(e) => warn!(error = %e, "table controller error"),
            }
        });

    let pod_controller = Controller::new(pods, watcher::Config::default().labels(ROLE_LABEL))
        .shutdown_on_signal()
        .run(reconcile_pod, error_policy::<Pod>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(pod = %obj.name, "pod reconciled"),
                Err(e) => warn!(error = %e, "pod controller error"),
            }
        });

    futures::join!(table_controller, pod_controller);
    info!("controllers stopped");
}

#[instrument(skip_all, fields(table = %table.name_any()))]
async fn reconcile_table(table: Arc<Table>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = ObjectKey::of(table.as_ref()).ok_or_else(|| ControllerError::MissingNamespace {
        kind: "Table",
        name: table.name_any(),
    })?;
    let outcome = ctx.dispatcher.reconcile(&key).await?;
    Ok(action_for(outcome))
}

#[instrument(skip_all, fields(pod = %pod.name_any()))]
async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    ctx.dispatcher.reconcile_pod(&pod).await?;
    // Pod phase changes arrive as events of their own.
    Ok(Action::await_change())
}

fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome.requeue_after {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

/// Retryable errors are requeued after the configured backoff. Terminal
/// ones wait for the object to change.
fn error_policy<K>(obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let terminal = error.is_terminal();
    error!(
        kind = %K::kind(&()),
        object = %obj.name_any(),
        namespace = ?obj.namespace(),
        %error,
        terminal,
        "reconciliation failed"
    );
    if terminal {
        Action::await_change()
    } else {
        Action::requeue(ctx.error_backoff)
    }
}
