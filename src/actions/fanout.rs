//! One task per target, errors drained from a shared channel.

use crate::device::{Credentials, DeviceAdapter, DeviceSession};
use crate::error::{ActionError, OperationError};
use log::{error, info};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sending half of a stage's error collector
pub type ErrorSink = mpsc::Sender<OperationError>;

/// Push one error into the collector
pub async fn report(sink: &ErrorSink, err: OperationError) {
    error!("{}", err);
    if sink.send(err).await.is_err() {
        error!("Error collector closed before all errors were reported");
    }
}

/// Run `task` once per target concurrently and return every reported error.
///
/// The channel holds `targets * writers_per_target` errors. The caller drains
/// it while a closer task waits for the workers and then drops the last
/// sender, so a full buffer never blocks the join.
pub async fn fan_out<T, F, Fut>(targets: Vec<T>, writers_per_target: usize, mut task: F) -> Vec<OperationError>
where
    T: Send + 'static,
    F: FnMut(T, ErrorSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let capacity = (targets.len() * writers_per_target).max(1);
    let (tx, mut rx) = mpsc::channel(capacity);

    let handles: Vec<JoinHandle<()>> = targets
        .into_iter()
        .map(|target| tokio::spawn(task(target, tx.clone())))
        .collect();

    let closer = tokio::spawn(async move {
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Fan-out task aborted: {}", e);
            }
        }
        drop(tx);
    });

    let mut errors = Vec::new();
    while let Some(err) = rx.recv().await {
        errors.push(err);
    }
    if let Err(e) = closer.await {
        error!("Fan-out closer aborted: {}", e);
    }
    errors
}

/// Open a session, reporting a login failure under `operation`
pub(crate) async fn open_session(
    adapter: &dyn DeviceAdapter,
    host: &str,
    credentials: &Credentials,
    operation: &str,
    sink: &ErrorSink,
) -> Option<Box<dyn DeviceSession>> {
    match adapter.login(host, credentials).await {
        Ok(session) => {
            info!("[{}] session established", host);
            Some(session)
        }
        Err(e) => {
            report(sink, OperationError::new(operation, host, ActionError::Login(e))).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_errors_from_every_target() {
        let errors = fan_out(vec!["a", "b", "c"], 2, |host, sink| async move {
            if host != "b" {
                report(&sink, OperationError::new("first", host, ActionError::Precondition("x".into()))).await;
                report(&sink, OperationError::new("second", host, ActionError::Precondition("y".into()))).await;
            }
        })
        .await;

        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.host != "b"));
    }

    #[tokio::test]
    async fn test_more_errors_than_capacity() {
        let errors = fan_out(vec![0u32], 1, |_, sink| async move {
            for i in 0..16 {
                report(&sink, OperationError::new(format!("op {}", i), "h", ActionError::Precondition("x".into()))).await;
            }
        })
        .await;
        assert_eq!(errors.len(), 16);
    }

    #[tokio::test]
    async fn test_no_targets() {
        let errors = fan_out(Vec::<u32>::new(), 1, |_, _| async {}).await;
        assert!(errors.is_empty());
    }
}
