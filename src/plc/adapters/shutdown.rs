//! Stop signalling shared by the server and the scan loop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

/// Outcome of waiting for a stopped task.
#[derive(Debug)]
pub enum Joined<T> {
    Finished(T),
    Failed(JoinError),
    /// Still running after the bound; the task has been aborted.
    Aborted,
}

/// Waits up to `bound` for `join`, aborting the task when the bound expires.
pub async fn join_within<T>(join: &mut JoinHandle<T>, bound: Duration) -> Joined<T> {
    match tokio::time::timeout(bound, &mut *join).await {
        Ok(Ok(value)) => Joined::Finished(value),
        Ok(Err(err)) => Joined::Failed(err),
        Err(_) => {
            join.abort();
            Joined::Aborted
        }
    }
}

/// Resolves once the flag is `true`. A dropped sender never resolves.
pub async fn wait_stop(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
