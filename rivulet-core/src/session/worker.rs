//! Per-session stimulus queue.
//!
//! Stimuli for one session are processed strictly one at a time, in arrival
//! order. The worker owns the receiving end of a bounded channel; callers
//! await the report of their own stimulus. Each dispatch runs on the blocking
//! pool, so a slow recompute only holds up its own session.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Session, Stimulus, StimulusReport};
use crate::error::{ReactiveError, ReactiveResult};

struct Job {
    stimulus: Stimulus,
    reply: oneshot::Sender<ReactiveResult<StimulusReport>>,
}

/// Serializes the stimuli of one session on a tokio task.
pub struct SessionWorker {
    session: Arc<Session>,
    sender: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

impl SessionWorker {
    /// Start the worker on the current tokio runtime. `capacity` bounds the
    /// number of queued stimuli; senders wait when it is full.
    pub fn spawn(session: Arc<Session>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));
        let worker_session = Arc::clone(&session);

        let handle = tokio::spawn(async move {
            while let Some(Job { stimulus, reply }) = receiver.recv().await {
                // Recomputes are synchronous; run them on the blocking pool.
                let session = Arc::clone(&worker_session);
                let report = tokio::task::spawn_blocking(move || session.dispatch(&stimulus))
                    .await
                    .unwrap_or_else(|error| {
                        tracing::warn!(session = %worker_session.id(), %error, "stimulus dispatch panicked");
                        Err(ReactiveError::lifecycle("process a stimulus"))
                    });
                if reply.send(report).is_err() {
                    tracing::debug!(session = %worker_session.id(), "stimulus requester went away");
                }
            }
            tracing::debug!(session = %worker_session.id(), "stimulus queue closed");
        });

        Self {
            session,
            sender,
            handle,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Stimuli the queue holds before senders wait.
    pub fn queue_capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Queue a stimulus and wait for its report.
    pub async fn send(&self, stimulus: Stimulus) -> ReactiveResult<StimulusReport> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job { stimulus, reply })
            .await
            .map_err(|_| ReactiveError::lifecycle("queue a stimulus"))?;
        response
            .await
            .map_err(|_| ReactiveError::lifecycle("await a stimulus report"))?
    }

    /// Process what is already queued, then stop.
    pub async fn shutdown(self) {
        let Self {
            session,
            sender,
            handle,
        } = self;
        drop(sender);
        if let Err(error) = handle.await {
            tracing::warn!(session = %session.id(), %error, "stimulus worker failed");
        }
    }
}

impl std::fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker")
            .field("session", &self.session.id())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}
