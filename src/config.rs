//! Engine configuration.
//!
//! Every feedback threshold is tunable here; defaults match the coaching
//! profile the engine ships with. Persisted as JSON under ~/.convocoach.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::feedback::FeedbackKind;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    pub schema_version: u32,

    // Feedback pacing
    /// Minimum gap between any two emitted feedback events
    pub cooldown_ms: i64,
    /// No feedback is evaluated this early in a conversation
    pub grace_ms: i64,

    // Rule thresholds
    /// Nominal capture window length, used to report monologue duration
    pub segment_duration_ms: u64,
    /// Consecutive user segments before the monologue rule fires
    pub monologue_segment_threshold: u32,
    /// Speaking-balance rules stay quiet before this much conversation
    pub balance_min_duration_ms: i64,
    pub max_speaking_percent: f64,
    pub min_speaking_percent: f64,
    pub fast_pace_wpm: f64,
    pub slow_pace_wpm: f64,
    /// Below this the slow-pace rule treats the audio as near-silence
    pub min_voiced_wpm: f64,
    /// Filler words in a single segment before the filler rule fires
    pub filler_threshold: u32,
    /// Time without any question before prompting for one
    pub question_prompt_ms: i64,
    pub low_confidence_score: f64,
    pub high_confidence_score: f64,

    /// Kinds emitted at most once per session. Pace kinds are excluded by
    /// default so pacing nudges can recur (the cooldown still spaces them).
    pub one_shot_kinds: HashSet<FeedbackKind>,

    // Dispatch / lifecycle
    /// Pause between consecutive spoken feedback utterances
    pub inter_utterance_gap_ms: u64,
    /// How long end-of-conversation waits for an in-flight analysis
    pub final_segment_grace_ms: u64,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            cooldown_ms: 5000,
            grace_ms: 5000,
            segment_duration_ms: 7000,
            monologue_segment_threshold: 2,
            balance_min_duration_ms: 30_000,
            max_speaking_percent: 70.0,
            min_speaking_percent: 30.0,
            fast_pace_wpm: 180.0,
            slow_pace_wpm: 120.0,
            min_voiced_wpm: 20.0,
            filler_threshold: 2,
            question_prompt_ms: 15_000,
            low_confidence_score: 50.0,
            high_confidence_score: 85.0,
            one_shot_kinds: default_one_shot_kinds(),
            inter_utterance_gap_ms: 2000,
            final_segment_grace_ms: 20_000,
        }
    }
}

fn default_one_shot_kinds() -> HashSet<FeedbackKind> {
    [
        FeedbackKind::Stutter,
        FeedbackKind::Monologue,
        FeedbackKind::Interruption,
        FeedbackKind::BalanceTalkative,
        FeedbackKind::BalanceQuiet,
        FeedbackKind::FillerWords,
        FeedbackKind::QuestionPrompt,
        FeedbackKind::ConfidenceLow,
        FeedbackKind::ConfidenceHigh,
        FeedbackKind::ToneNervous,
        FeedbackKind::SentimentPositive,
    ]
    .into_iter()
    .collect()
}

impl CoachConfig {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".convocoach"))
    }

    /// Get the default archive directory for persisted conversations
    pub fn default_archive_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("archive"))
    }
}
