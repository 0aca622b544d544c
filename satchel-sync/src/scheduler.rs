/// Debounced upload scheduling.
///
/// Local mutations arrive in bursts (typing, streaming output); the
/// scheduler collapses any number of requests inside the debounce window
/// into a single upload trigger. Two cadences exist: a short hot window for
/// latency-sensitive collections and a longer cold window for the rest.
/// When both are armed, the earlier deadline wins.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use satchel_core::Cadence;

/// Handle to the debounce task. Requesting an upload is idempotent within
/// the window. Dropping the handle shuts the task down.
#[derive(Debug, Clone)]
pub struct UploadScheduler {
    req_tx: mpsc::UnboundedSender<Cadence>,
}

impl UploadScheduler {
    /// Spawn the debounce task. Each elapsed window sends exactly one unit
    /// on `fire_tx`.
    pub fn spawn(hot: Duration, cold: Duration, fire_tx: mpsc::UnboundedSender<()>) -> Self {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(hot, cold, req_rx, fire_tx));
        Self { req_tx }
    }

    /// Request an upload after the given cadence's window. Any request may
    /// only pull the armed deadline earlier, never push it back.
    pub fn request(&self, cadence: Cadence) {
        // Send fails only after shutdown; late requests are dropped.
        let _ = self.req_tx.send(cadence);
    }
}

async fn run(
    hot: Duration,
    cold: Duration,
    mut req_rx: mpsc::UnboundedReceiver<Cadence>,
    fire_tx: mpsc::UnboundedSender<()>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            req = req_rx.recv() => {
                let Some(cadence) = req else { break };
                let window = match cadence {
                    Cadence::Hot => hot,
                    Cadence::Cold => cold,
                };
                let candidate = Instant::now() + window;
                deadline = Some(match deadline {
                    Some(existing) => existing.min(candidate),
                    None => candidate,
                });
            }
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                deadline = None;
                if fire_tx.send(()).is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("upload scheduler stopped");
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        // Guarded out by the select arm condition.
        None => std::future::pending().await,
    }
}
