//! Serial task context standing in for the host's UI thread.
//!
//! Work posted here runs one task at a time, in posting order, on a single
//! tokio task. Stopping cancels the loop; queued tasks are dropped.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Task = BoxFuture<'static, ()>;

pub struct TaskRunner {
    name: &'static str,
    tx: mpsc::UnboundedSender<Task>,
    token: CancellationToken,
}

impl TaskRunner {
    pub fn spawn(name: &'static str, runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let token = CancellationToken::new();
        let loop_token = token.clone();

        runtime.spawn(async move {
            tracing::debug!(runner = name, "Task runner started");
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    task = rx.recv() => match task {
                        Some(task) => task.await,
                        None => break,
                    },
                }
            }
            tracing::debug!(runner = name, "Task runner stopped");
        });

        Self { name, tx, token }
    }

    /// Queue `task`. Returns false once the runner is stopped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::debug!(runner = self.name, "Task posted after stop, dropped");
            return false;
        }
        self.tx.send(Box::pin(task)).is_ok()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
