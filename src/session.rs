//! Conversation session lifecycle.
//!
//! One `CoachSession` per open conversation. Segments are fed through a
//! single-slot channel into a worker task, so analysis cycles never
//! overlap: while one segment is in flight, a second submission is
//! accepted into the slot and a third is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::SegmentAnalysis;
use crate::config::CoachConfig;
use crate::dispatch::{FeedbackDispatcher, PlaybackSink};
use crate::feedback::FeedbackEvaluator;
use crate::oracle::AnalysisOracle;
use crate::state::ConversationState;
use crate::store::{ConversationStore, SegmentStore, StoreError, SummaryStore};
use crate::summary::{Summary, SummaryError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
}

/// Everything a session needs from the outside world
#[derive(Clone)]
pub struct SessionDeps {
    /// Absent in replay mode, where segments arrive pre-analyzed
    pub oracle: Option<Arc<dyn AnalysisOracle>>,
    pub playback: Arc<dyn PlaybackSink>,
    pub conversations: Arc<dyn ConversationStore>,
    pub segments: Arc<dyn SegmentStore>,
    pub summaries: Arc<dyn SummaryStore>,
}

enum SegmentJob {
    Audio { bytes: Vec<u8>, mime_type: String },
    Analysis(SegmentAnalysis),
}

pub struct CoachSession {
    conversation_id: Uuid,
    user_id: String,
    config: CoachConfig,
    deps: SessionDeps,
    dispatcher: FeedbackDispatcher,
    tx: mpsc::Sender<SegmentJob>,
    worker: JoinHandle<()>,
}

impl CoachSession {
    /// Open a conversation anchored at the current wall clock
    pub async fn start(
        config: CoachConfig,
        deps: SessionDeps,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Self, SessionError> {
        Self::start_with_clock(config, deps, user_id, title, Utc::now().timestamp_millis()).await
    }

    /// Open a conversation anchored at an explicit clock reading. Replay
    /// passes the historical start so grace and cooldown windows line up
    /// with the recorded timestamps.
    pub async fn start_with_clock(
        config: CoachConfig,
        deps: SessionDeps,
        user_id: &str,
        title: Option<String>,
        started_at_ms: i64,
    ) -> Result<Self, SessionError> {
        let conversation = deps
            .conversations
            .create(user_id, title, started_at_ms)
            .await?;
        info!(conversation_id = %conversation.id, "Conversation started");

        let dispatcher = FeedbackDispatcher::new(
            deps.playback.clone(),
            Duration::from_millis(config.inter_utterance_gap_ms),
        );

        // Capacity 1: one segment in flight, one waiting, the rest dropped
        let (tx, rx) = mpsc::channel(1);
        let worker = tokio::spawn(run_worker(
            rx,
            conversation.id,
            user_id.to_string(),
            deps.oracle.clone(),
            deps.segments.clone(),
            FeedbackEvaluator::new(config.clone()),
            ConversationState::new(started_at_ms),
            dispatcher.clone(),
        ));

        Ok(Self {
            conversation_id: conversation.id,
            user_id: user_id.to_string(),
            config,
            deps,
            dispatcher,
            tx,
            worker,
        })
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Submit a raw audio segment for analysis. Returns false when the
    /// processing slot is occupied and the segment was dropped.
    pub fn ingest_audio(&self, bytes: Vec<u8>, mime_type: &str) -> bool {
        self.submit(SegmentJob::Audio {
            bytes,
            mime_type: mime_type.to_string(),
        })
    }

    /// Submit an already-analyzed segment (replay, tests)
    pub fn ingest_analysis(&self, segment: SegmentAnalysis) -> bool {
        self.submit(SegmentJob::Analysis(segment))
    }

    fn submit(&self, job: SegmentJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Processing slot occupied, dropping segment");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Session worker gone, dropping segment");
                false
            }
        }
    }

    /// Finish the conversation: drain the in-flight segment (bounded),
    /// persist the lifecycle record, and produce the report card.
    pub async fn end(self) -> Result<Summary, SessionError> {
        let ended_at_ms = Utc::now().timestamp_millis();
        self.end_at(ended_at_ms).await
    }

    /// `end` with an explicit clock reading, for replay
    pub async fn end_at(self, ended_at_ms: i64) -> Result<Summary, SessionError> {
        let Self {
            conversation_id,
            user_id,
            config,
            deps,
            dispatcher,
            tx,
            mut worker,
        } = self;

        // Closing the channel lets the worker finish what it holds
        drop(tx);
        let grace = Duration::from_millis(config.final_segment_grace_ms);
        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            warn!("Final segment still in flight after grace period, abandoning it");
            worker.abort();
        }
        dispatcher.clear_queue().await;

        deps.conversations.end(conversation_id, ended_at_ms).await?;

        // A store that cannot be read degrades to the fallback report; a
        // conversation with genuinely no segments is the caller's error
        let summary = match deps.segments.list_by_conversation(conversation_id).await {
            Ok(stored) => {
                let segments: Vec<SegmentAnalysis> =
                    stored.into_iter().map(|s| s.segment).collect();
                Summary::build(conversation_id, &user_id, ended_at_ms, &segments)?
            }
            Err(e) => {
                warn!("Could not read segments back for summary: {}", e);
                Summary::fallback(conversation_id, &user_id, ended_at_ms)
            }
        };

        if let Err(e) = deps.summaries.upsert(&summary).await {
            warn!("Failed to persist summary: {}", e);
        }

        info!(
            conversation_id = %conversation_id,
            grade = %summary.grade,
            score = summary.grade_score,
            "Conversation ended"
        );
        Ok(summary)
    }

    /// Tear the session down without producing a summary
    pub async fn abort(self) {
        self.worker.abort();
        self.dispatcher.clear_queue().await;
        info!(conversation_id = %self.conversation_id, "Conversation aborted");
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<SegmentJob>,
    conversation_id: Uuid,
    user_id: String,
    oracle: Option<Arc<dyn AnalysisOracle>>,
    segments: Arc<dyn SegmentStore>,
    evaluator: FeedbackEvaluator,
    mut state: ConversationState,
    dispatcher: FeedbackDispatcher,
) {
    while let Some(job) = rx.recv().await {
        let segment = match job {
            SegmentJob::Audio { bytes, mime_type } => {
                let Some(oracle) = oracle.as_ref() else {
                    warn!("Audio segment received but no oracle is configured");
                    continue;
                };
                match oracle
                    .analyze(&bytes, &mime_type, Utc::now().timestamp_millis())
                    .await
                {
                    Ok(segment) => segment,
                    Err(e) => {
                        warn!("Segment analysis failed: {}", e);
                        continue;
                    }
                }
            }
            SegmentJob::Analysis(segment) => segment,
        };

        if segment.is_silent() {
            debug!("Skipping silent segment");
            continue;
        }

        // Feedback still flows when persistence is down
        if let Err(e) = segments.append(conversation_id, &user_id, &segment).await {
            warn!("Failed to persist segment: {}", e);
        }

        state.update(&segment);
        // The segment's own timestamp is the evaluation clock, so live and
        // replayed conversations behave identically
        if let Some(feedback) = evaluator.evaluate(&mut state, &segment, segment.timestamp_ms) {
            dispatcher.enqueue(feedback).await;
        }
    }
}
