//! Results of background work, delivered to the owner over one channel.
//!
//! Every spawned task (feed refresh, media load, clap and block POSTs) reports
//! back with a [`StoriesEvent`]. The owner applies it with
//! [`StoriesHub::handle_event`](crate::hub::StoriesHub::handle_event).

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::model::Company;

/// Events from background tasks
#[derive(Debug)]
pub enum StoriesEvent {
    /// A feed fetch + reconcile cycle finished.
    ///
    /// `generation` is the refresh counter at spawn time; stale cycles are
    /// dropped by the hub.
    RefreshComplete {
        generation: u64,
        result: Result<Vec<Company>, String>,
    },
    /// Media for a story is available to play.
    ///
    /// `duration` is the natural play length when the loader knows it (video).
    MediaReady {
        company_id: i64,
        story_id: String,
        generation: u64,
        duration: Option<Duration>,
    },
    MediaFailed {
        company_id: i64,
        story_id: String,
        generation: u64,
        error: String,
    },
    /// Outcome of a clap POST. `clapped` is true only on `success == 1`.
    ClapAcked {
        company_id: i64,
        story_id: String,
        clapped: bool,
    },
    /// Outcome of a block POST.
    BlockResult { company_id: i64, blocked: bool },
    /// Stale cache entries were evicted after a refresh.
    CachePurged { evicted: usize },
    /// A background task panicked.
    TaskPanicked { task: &'static str, error: String },
}

/// Send an event, logging instead of failing when the receiver is gone.
pub(crate) async fn send_event(tx: &mpsc::Sender<StoriesEvent>, event: StoriesEvent) {
    if let Err(e) = tx.send(event).await {
        tracing::warn!(error = %e, "Channel send failed (receiver dropped)");
    }
}

/// Run a task body, turning a panic into its message.
pub(crate) async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            }
        })
}

/// Spawn `body` and report a panic as [`StoriesEvent::TaskPanicked`].
pub(crate) fn spawn_reporting<F>(
    task: &'static str,
    tx: mpsc::Sender<StoriesEvent>,
    body: F,
) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = catch_task_panic(body).await {
            tracing::error!(task, error = %error, "Background task panicked");
            send_event(&tx, StoriesEvent::TaskPanicked { task, error }).await;
        }
    })
}
