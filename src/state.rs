//! Live conversation state.
//!
//! Exactly one instance exists per open conversation. Built incrementally
//! from each incoming segment; pure state plus a transition function, no I/O.
//! The state is owned by the session's single processing path and never
//! persisted; the end-of-conversation summary recomputes everything from
//! the segment store instead.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::analysis::{SegmentAnalysis, Speaker};
use crate::feedback::FeedbackKind;

/// How many recent segment digests to keep for cross-segment checks
const SEGMENT_HISTORY_DEPTH: usize = 3;

/// Compact per-segment record kept in the bounded history ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDigest {
    pub timestamp_ms: i64,
    pub speaker: Speaker,
    pub duration_ms: u64,
    pub word_count: u64,
    pub has_question: bool,
}

/// Cumulative counters for one open conversation
#[derive(Debug, Clone)]
pub struct ConversationState {
    started_at_ms: i64,
    pub total_words: u64,
    pub total_duration_ms: u64,
    pub user_speaking_ms: u64,
    pub interruption_count: u32,
    pub question_count: u32,
    pub stutter_events: u32,
    pub last_speaker: Option<Speaker>,
    pub consecutive_user_segments: u32,
    pub last_question_timestamp_ms: Option<i64>,
    segment_history: VecDeque<SegmentDigest>,
    /// Feedback kinds already emitted this session (at-most-once policy)
    pub feedback_given: HashSet<FeedbackKind>,
    pub last_feedback_timestamp_ms: Option<i64>,
}

impl ConversationState {
    /// Start tracking a new conversation at the given clock reading
    pub fn new(started_at_ms: i64) -> Self {
        Self {
            started_at_ms,
            total_words: 0,
            total_duration_ms: 0,
            user_speaking_ms: 0,
            interruption_count: 0,
            question_count: 0,
            stutter_events: 0,
            last_speaker: None,
            consecutive_user_segments: 0,
            last_question_timestamp_ms: None,
            segment_history: VecDeque::with_capacity(SEGMENT_HISTORY_DEPTH),
            feedback_given: HashSet::new(),
            last_feedback_timestamp_ms: None,
        }
    }

    /// Zero all counters and restart the conversation clock
    pub fn reset(&mut self, started_at_ms: i64) {
        *self = Self::new(started_at_ms);
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    /// Fold one segment into the running state.
    ///
    /// Never fails: absent analysis fields contribute their zero value.
    /// Each call is one unit of conversational time, so this is not
    /// idempotent.
    pub fn update(&mut self, segment: &SegmentAnalysis) {
        let words = segment.word_count();
        self.total_words += words;
        self.total_duration_ms += segment.duration_ms;

        if segment.speaker == Speaker::User {
            self.user_speaking_ms += segment.duration_ms;
            if self.last_speaker == Some(Speaker::User) {
                self.consecutive_user_segments += 1;
            } else {
                self.consecutive_user_segments = 1;
            }
        } else {
            self.consecutive_user_segments = 0;
        }
        self.last_speaker = Some(segment.speaker);

        let interruptions = &segment.analysis.interruptions;
        if interruptions.detected {
            self.interruption_count += interruptions.count.max(1);
        }

        let questions = segment.question_count();
        if questions > 0 {
            self.question_count += questions;
            self.last_question_timestamp_ms = Some(segment.timestamp_ms);
        }

        self.stutter_events += segment.analysis.stutters.len() as u32;

        if self.segment_history.len() >= SEGMENT_HISTORY_DEPTH {
            self.segment_history.pop_front();
        }
        self.segment_history.push_back(SegmentDigest {
            timestamp_ms: segment.timestamp_ms,
            speaker: segment.speaker,
            duration_ms: segment.duration_ms,
            word_count: words,
            has_question: questions > 0,
        });
    }

    /// Running words-per-minute over everything heard so far
    pub fn current_wpm(&self) -> f64 {
        if self.total_duration_ms == 0 {
            return 0.0;
        }
        let minutes = self.total_duration_ms as f64 / 60_000.0;
        self.total_words as f64 / minutes
    }

    /// Share of total time the user has been speaking, in percent.
    ///
    /// Assumes exactly two parties: the other speaker's time is inferred as
    /// total minus user. Returns 50.0 (balanced) before any audio arrives.
    pub fn speaking_percent(&self) -> f64 {
        if self.total_duration_ms == 0 {
            return 50.0;
        }
        self.user_speaking_ms as f64 / self.total_duration_ms as f64 * 100.0
    }

    /// Elapsed time since the user last asked a question, or since the
    /// conversation started if they have not asked one yet
    pub fn time_since_last_question_ms(&self, now_ms: i64) -> i64 {
        match self.last_question_timestamp_ms {
            Some(ts) => now_ms - ts,
            None => now_ms - self.started_at_ms,
        }
    }

    pub fn segment_history(&self) -> &VecDeque<SegmentDigest> {
        &self.segment_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, Interruptions, Stutter, StutterKind};

    fn segment(speaker: Speaker, transcript: &str, timestamp_ms: i64) -> SegmentAnalysis {
        SegmentAnalysis {
            transcript: transcript.to_string(),
            speaker,
            timestamp_ms,
            duration_ms: 7000,
            analysis: Analysis::default(),
        }
    }

    #[test]
    fn test_duration_accumulates_across_speakers() {
        let mut state = ConversationState::new(0);
        state.update(&segment(Speaker::User, "one two three", 0));
        state.update(&segment(Speaker::Other, "four five", 7000));
        state.update(&segment(Speaker::User, "six", 14000));

        assert_eq!(state.total_duration_ms, 21000);
        assert_eq!(state.total_words, 6);
        assert_eq!(state.user_speaking_ms, 14000);
    }

    #[test]
    fn test_consecutive_user_segments_run() {
        let mut state = ConversationState::new(0);
        state.update(&segment(Speaker::User, "a", 0));
        assert_eq!(state.consecutive_user_segments, 1);
        state.update(&segment(Speaker::User, "b", 7000));
        assert_eq!(state.consecutive_user_segments, 2);
        state.update(&segment(Speaker::Other, "c", 14000));
        assert_eq!(state.consecutive_user_segments, 0);
        // First user segment after a non-user run restarts at 1, not 0
        state.update(&segment(Speaker::User, "d", 21000));
        assert_eq!(state.consecutive_user_segments, 1);
    }

    #[test]
    fn test_wpm_zero_before_any_segment() {
        let state = ConversationState::new(0);
        assert_eq!(state.current_wpm(), 0.0);
        assert_eq!(state.speaking_percent(), 50.0);
    }

    #[test]
    fn test_wpm_calculation() {
        let mut state = ConversationState::new(0);
        // 30 words over 12 seconds = 150 wpm
        let mut seg = segment(Speaker::User, &"word ".repeat(30), 0);
        seg.duration_ms = 12000;
        state.update(&seg);
        assert!((state.current_wpm() - 150.0).abs() < 0.01);
    }

    #[test]
    fn test_question_tracking() {
        let mut state = ConversationState::new(0);
        state.update(&segment(Speaker::User, "no questions here", 1000));
        assert_eq!(state.question_count, 0);
        assert_eq!(state.time_since_last_question_ms(10_000), 10_000);

        state.update(&segment(Speaker::User, "really? are you sure?", 8000));
        assert_eq!(state.question_count, 2);
        assert_eq!(state.last_question_timestamp_ms, Some(8000));
        assert_eq!(state.time_since_last_question_ms(10_000), 2000);
    }

    #[test]
    fn test_interruption_count_defaults_to_one() {
        let mut state = ConversationState::new(0);
        let mut seg = segment(Speaker::User, "sorry to cut in", 0);
        seg.analysis.interruptions = Interruptions {
            detected: true,
            count: 0,
        };
        state.update(&seg);
        assert_eq!(state.interruption_count, 1);

        seg.analysis.interruptions = Interruptions {
            detected: true,
            count: 2,
        };
        state.update(&seg);
        assert_eq!(state.interruption_count, 3);
    }

    #[test]
    fn test_stutter_events_accumulate() {
        let mut state = ConversationState::new(0);
        let mut seg = segment(Speaker::User, "w-well I think", 0);
        seg.analysis.stutters = vec![Stutter {
            word: "w-well".into(),
            timestamp: 0.1,
            kind: StutterKind::Repetition,
        }];
        state.update(&seg);
        state.update(&seg);
        assert_eq!(state.stutter_events, 2);
    }

    #[test]
    fn test_history_ring_bounded() {
        let mut state = ConversationState::new(0);
        for i in 0..5 {
            state.update(&segment(Speaker::User, "hello", i * 7000));
        }
        assert_eq!(state.segment_history().len(), 3);
        // Oldest evicted: front should be the third segment
        assert_eq!(state.segment_history().front().unwrap().timestamp_ms, 14000);
    }

    #[test]
    fn test_empty_transcript_contributes_zero_words() {
        let mut state = ConversationState::new(0);
        state.update(&segment(Speaker::User, "", 0));
        assert_eq!(state.total_words, 0);
        assert_eq!(state.total_duration_ms, 7000);
    }

    #[test]
    fn test_reset() {
        let mut state = ConversationState::new(0);
        state.update(&segment(Speaker::User, "hello there", 0));
        state.feedback_given.insert(FeedbackKind::Monologue);
        state.reset(5000);
        assert_eq!(state.total_words, 0);
        assert_eq!(state.started_at_ms(), 5000);
        assert!(state.feedback_given.is_empty());
    }
}
