//! Feedback dispatch.
//!
//! Serializes spoken feedback: at most one utterance plays at a time, a
//! fixed gap separates consecutive utterances, and a kind that is already
//! queued or playing is never queued twice. Playback failures are logged
//! and swallowed; coaching must never take the conversation down with it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::feedback::{Feedback, FeedbackKind};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback failed: {0}")]
    Failed(String),
}

/// Boundary trait for whatever renders feedback to the user
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn speak(&self, feedback: &Feedback) -> Result<(), PlaybackError>;
}

/// Sink that just logs each utterance. Used by the replay CLI and as a
/// stand-in when no audio output is wired up.
pub struct LoggingSink;

#[async_trait]
impl PlaybackSink for LoggingSink {
    async fn speak(&self, feedback: &Feedback) -> Result<(), PlaybackError> {
        info!(kind = feedback.kind.as_str(), "{}", feedback.message);
        Ok(())
    }
}

struct DispatchState {
    queue: VecDeque<Feedback>,
    /// Kinds currently queued or playing
    active_kinds: HashSet<FeedbackKind>,
    is_playing: bool,
}

#[derive(Clone)]
pub struct FeedbackDispatcher {
    sink: Arc<dyn PlaybackSink>,
    gap: Duration,
    state: Arc<Mutex<DispatchState>>,
}

impl FeedbackDispatcher {
    pub fn new(sink: Arc<dyn PlaybackSink>, inter_utterance_gap: Duration) -> Self {
        Self {
            sink,
            gap: inter_utterance_gap,
            state: Arc::new(Mutex::new(DispatchState {
                queue: VecDeque::new(),
                active_kinds: HashSet::new(),
                is_playing: false,
            })),
        }
    }

    /// Queue feedback for playback. Returns false when the same kind is
    /// already queued or playing and the event was dropped.
    ///
    /// While something is playing, new feedback goes to the FRONT of the
    /// queue: the freshest observation is the most relevant one.
    pub async fn enqueue(&self, feedback: Feedback) -> bool {
        let mut state = self.state.lock().await;
        if state.active_kinds.contains(&feedback.kind) {
            debug!(kind = feedback.kind.as_str(), "Dropping duplicate feedback");
            return false;
        }
        state.active_kinds.insert(feedback.kind);

        if state.is_playing {
            state.queue.push_front(feedback);
        } else {
            state.is_playing = true;
            drop(state);
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.playback_loop(feedback).await;
            });
        }
        true
    }

    /// Drop everything pending. An in-flight utterance is allowed to
    /// finish; nothing follows it.
    pub async fn clear_queue(&self) {
        let mut state = self.state.lock().await;
        let drained: Vec<Feedback> = state.queue.drain(..).collect();
        for feedback in &drained {
            state.active_kinds.remove(&feedback.kind);
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cleared pending feedback");
        }
    }

    async fn playback_loop(self, first: Feedback) {
        let mut current = first;
        loop {
            if let Err(e) = self.sink.speak(&current).await {
                warn!(kind = current.kind.as_str(), "Feedback playback failed: {}", e);
            }
            {
                let mut state = self.state.lock().await;
                state.active_kinds.remove(&current.kind);
            }

            tokio::time::sleep(self.gap).await;

            let mut state = self.state.lock().await;
            match state.queue.pop_front() {
                Some(next) => current = next,
                None => {
                    state.is_playing = false;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(kind: FeedbackKind, message: &str) -> Feedback {
        Feedback {
            kind,
            message: message.to_string(),
            priority: 1,
            metadata: serde_json::Value::Null,
        }
    }

    /// Sink that records utterances and takes simulated time to play them
    struct RecordingSink {
        spoken: std::sync::Mutex<Vec<FeedbackKind>>,
        play_time: Duration,
        fail: bool,
    }

    impl RecordingSink {
        fn new(play_time: Duration) -> Arc<Self> {
            Arc::new(Self {
                spoken: std::sync::Mutex::new(Vec::new()),
                play_time,
                fail: false,
            })
        }

        fn spoken(&self) -> Vec<FeedbackKind> {
            self.spoken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn speak(&self, feedback: &Feedback) -> Result<(), PlaybackError> {
            self.spoken.lock().unwrap().push(feedback.kind);
            tokio::time::sleep(self.play_time).await;
            if self.fail {
                return Err(PlaybackError::Failed("device gone".into()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_kind_dropped_while_active() {
        let sink = RecordingSink::new(Duration::from_secs(1));
        let dispatcher = FeedbackDispatcher::new(sink.clone(), Duration::from_secs(2));

        assert!(dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "a")).await);
        assert!(!dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "b")).await);
        // A different kind is still accepted
        assert!(dispatcher.enqueue(feedback(FeedbackKind::Monologue, "c")).await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            sink.spoken(),
            vec![FeedbackKind::PaceFast, FeedbackKind::Monologue]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_reusable_after_playback() {
        let sink = RecordingSink::new(Duration::from_secs(1));
        let dispatcher = FeedbackDispatcher::new(sink.clone(), Duration::from_secs(2));

        dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "a")).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "b")).await);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.spoken().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshest_feedback_plays_next() {
        let sink = RecordingSink::new(Duration::from_secs(5));
        let dispatcher = FeedbackDispatcher::new(sink.clone(), Duration::from_secs(2));

        dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "a")).await;
        // Queued while "a" is playing; each newer one jumps the line
        dispatcher.enqueue(feedback(FeedbackKind::Monologue, "b")).await;
        dispatcher.enqueue(feedback(FeedbackKind::FillerWords, "c")).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            sink.spoken(),
            vec![
                FeedbackKind::PaceFast,
                FeedbackKind::FillerWords,
                FeedbackKind::Monologue
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_queue_drops_pending_only() {
        let sink = RecordingSink::new(Duration::from_secs(5));
        let dispatcher = FeedbackDispatcher::new(sink.clone(), Duration::from_secs(2));

        dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "a")).await;
        dispatcher.enqueue(feedback(FeedbackKind::Monologue, "b")).await;
        dispatcher.clear_queue().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        // In-flight "a" finished, pending "b" never played
        assert_eq!(sink.spoken(), vec![FeedbackKind::PaceFast]);

        // The cleared kind is immediately reusable
        assert!(dispatcher.enqueue(feedback(FeedbackKind::Monologue, "b2")).await);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            sink.spoken(),
            vec![FeedbackKind::PaceFast, FeedbackKind::Monologue]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink {
            spoken: std::sync::Mutex::new(Vec::new()),
            play_time: Duration::from_secs(1),
            fail: true,
        });
        let dispatcher = FeedbackDispatcher::new(sink.clone(), Duration::from_secs(2));

        dispatcher.enqueue(feedback(FeedbackKind::PaceFast, "a")).await;
        dispatcher.enqueue(feedback(FeedbackKind::Monologue, "b")).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        // Both were attempted despite the first failing
        assert_eq!(sink.spoken().len(), 2);
    }
}
