//! Segment analysis data contract.
//!
//! Normalized shape of one analyzed audio segment as returned by the speech
//! analysis oracle. Every sub-field carries a serde default so a partial or
//! malformed oracle response decays to zero/empty values instead of failing
//! the segment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Nominal capture window length when the oracle does not report one
pub const DEFAULT_SEGMENT_DURATION_MS: u64 = 7000;

/// Which party produced a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    #[default]
    User,
    Other,
}

/// One analyzed capture window
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentAnalysis {
    /// Word-for-word transcript; empty when the oracle found no speech
    #[serde(rename = "transcription", alias = "transcript")]
    pub transcript: String,
    pub speaker: Speaker,
    /// Capture time, epoch milliseconds, monotonic within a conversation
    pub timestamp_ms: i64,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub analysis: Analysis,
}

impl SegmentAnalysis {
    /// Whitespace-token count of the transcript
    pub fn word_count(&self) -> u64 {
        self.transcript.split_whitespace().count() as u64
    }

    /// Literal `?` characters in the transcript
    pub fn question_count(&self) -> u32 {
        self.transcript.matches('?').count() as u32
    }

    /// Sum of per-word filler counts in this segment
    pub fn filler_count(&self) -> u32 {
        self.analysis.filler_words.iter().map(|f| f.count).sum()
    }

    /// True when the oracle found no usable speech in the window
    pub fn is_silent(&self) -> bool {
        self.transcript.trim().is_empty()
    }
}

/// Per-segment linguistic/acoustic analysis
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Analysis {
    pub speaking_rate: SpeakingRate,
    pub filler_words: Vec<FillerWord>,
    pub stutters: Vec<Stutter>,
    pub pauses: Vec<Pause>,
    pub tone: Tone,
    pub confidence: Confidence,
    pub interruptions: Interruptions,
    pub sentiment: Sentiment,
    pub key_insights: Vec<String>,
}

impl Analysis {
    /// Clamp all numeric scores to [0, 100]
    pub fn normalize(&mut self) {
        self.tone.score = self.tone.score.clamp(0.0, 100.0);
        self.confidence.score = self.confidence.score.clamp(0.0, 100.0);
    }

    /// The stutter kind occurring most often in this segment, if any
    pub fn dominant_stutter_kind(&self) -> Option<StutterKind> {
        if self.stutters.is_empty() {
            return None;
        }
        let mut counts: HashMap<StutterKind, usize> = HashMap::new();
        for stutter in &self.stutters {
            *counts.entry(stutter.kind).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by_key(|entry| (entry.1, entry.0 as u8))
            .map(|(kind, _)| kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeakingRate {
    pub words_per_minute: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FillerWord {
    pub word: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Stutter {
    pub word: String,
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: StutterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StutterKind {
    #[default]
    Repetition,
    Prolongation,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Pause {
    /// Seconds
    pub duration: f64,
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: PauseKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PauseKind {
    Filler,
    #[default]
    Silence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tone {
    pub overall: ToneLabel,
    pub score: f64,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            overall: ToneLabel::Neutral,
            score: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToneLabel {
    Confident,
    Nervous,
    Uncertain,
    Aggressive,
    Calm,
    #[default]
    Neutral,
}

impl ToneLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confident => "confident",
            Self::Nervous => "nervous",
            Self::Uncertain => "uncertain",
            Self::Aggressive => "aggressive",
            Self::Calm => "calm",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Confidence {
    pub score: f64,
}

impl Default for Confidence {
    fn default() -> Self {
        Self { score: 50.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Interruptions {
    pub detected: bool,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// Extract a JSON document from oracle output that may wrap it in a
/// markdown code fence
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let body = &trimmed[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }
    trimmed
}

/// Flat response document the oracle produces (analysis fields at top level
/// alongside the transcript)
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct OracleDocument {
    transcription: String,
    #[serde(flatten)]
    analysis: Analysis,
}

/// Parse the oracle's response text into a segment record.
///
/// Unparseable output yields the default record (empty transcript, neutral
/// analysis) rather than an error; the session skips silent segments anyway.
pub fn parse_oracle_payload(text: &str, timestamp_ms: i64, duration_ms: u64) -> SegmentAnalysis {
    let json = extract_json(text);
    let doc: OracleDocument = serde_json::from_str(json).unwrap_or_else(|e| {
        tracing::warn!("Oracle response was not valid JSON, using defaults: {}", e);
        let mut doc = OracleDocument::default();
        doc.analysis.key_insights = vec!["Could not parse oracle response".to_string()];
        doc
    });

    let mut analysis = doc.analysis;
    analysis.normalize();

    SegmentAnalysis {
        transcript: doc.transcription,
        speaker: Speaker::User,
        timestamp_ms,
        duration_ms,
        analysis,
    }
}
