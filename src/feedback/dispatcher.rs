//! Violation feedback worker: log every event, narrate when the speaker is free

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::violation::ViolationEvent;

use super::event_log::EventLog;
use super::narrator::Narrator;

pub const FEEDBACK_QUEUE_CAPACITY: usize = 64;

/// Hands events to the narrator with at most one narration in flight.
/// A request made while one is playing is dropped, never queued.
#[derive(Clone)]
pub struct FeedbackDispatcher {
    narrator: Arc<dyn Narrator>,
    slot: Arc<Semaphore>,
}

impl FeedbackDispatcher {
    pub fn new(narrator: Arc<dyn Narrator>) -> Self {
        Self {
            narrator,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Start narrating `event` in the background. Returns false if a
    /// narration was already running and this one was skipped.
    pub fn notify(&self, event: &ViolationEvent) -> bool {
        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(kind = %event.kind, "Narration busy, skipping");
                return false;
            }
        };

        let narrator = self.narrator.clone();
        let text = event.narrated_prompt();
        let kind = event.kind;
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = narrator.synthesize_and_play(text).await {
                warn!(kind = %kind, error = %e, "Narration failed");
            }
        });
        true
    }

    /// Wait for the narration in flight, if any, to finish
    pub async fn wait_idle(&self) {
        let _ = self.slot.acquire().await;
    }
}

/// Spawn the worker that drains violation events. It exits once every
/// sender is dropped.
pub fn spawn_worker(
    log: EventLog,
    dispatcher: FeedbackDispatcher,
    capacity: usize,
) -> (mpsc::Sender<ViolationEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ViolationEvent>(capacity);

    let handle = tokio::spawn(async move {
        info!(dir = %log.dir().display(), "Feedback worker started");

        while let Some(event) = rx.recv().await {
            let writer = log.clone();
            let row = event.clone();
            match tokio::task::spawn_blocking(move || writer.record(&row)).await {
                Ok(Ok(path)) => {
                    debug!(kind = %event.kind, path = %path.display(), "Violation recorded");
                }
                Ok(Err(e)) => error!(kind = %event.kind, error = %e, "Failed to record violation"),
                Err(e) => error!(error = %e, "Event log task failed"),
            }

            dispatcher.notify(&event);
        }

        info!("Feedback worker stopped");
    });

    (tx, handle)
}
