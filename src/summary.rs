//! End-of-conversation summary.
//!
//! Recomputes every metric from the persisted segments rather than trusting
//! the live counters, so a summary can be regenerated at any time from the
//! store alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::analysis::{SegmentAnalysis, Sentiment, Speaker, ToneLabel};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("conversation has no segments to summarize")]
    EmptyConversation,
}

/// Aggregated metrics over a whole conversation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryMetrics {
    pub total_segments: u32,
    pub total_words: u64,
    pub total_duration_ms: u64,
    pub avg_words_per_minute: f64,
    pub total_filler_words: u32,
    /// Filler words per 100 words spoken
    pub filler_word_rate: f64,
    pub total_stutters: u32,
    /// Stutter events per 100 words spoken
    pub stutter_rate: f64,
    pub total_pauses: u32,
    /// Mean pause length in seconds
    pub avg_pause_duration: f64,
    pub confidence_score: f64,
    pub overall_tone: ToneLabel,
    pub overall_sentiment: Sentiment,
    pub user_speaking_percent: f64,
    pub total_interruptions: u32,
    pub total_questions: u32,
    pub filler_word_breakdown: HashMap<String, u32>,
    pub tone_breakdown: HashMap<ToneLabel, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::A
        } else if score >= 80.0 {
            Self::B
        } else if score >= 70.0 {
            Self::C
        } else if score >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recompute conversation metrics from scratch over the stored segments
pub fn aggregate(segments: &[SegmentAnalysis]) -> Result<SummaryMetrics, SummaryError> {
    if segments.is_empty() {
        return Err(SummaryError::EmptyConversation);
    }

    let mut metrics = SummaryMetrics {
        total_segments: segments.len() as u32,
        ..Default::default()
    };

    let mut user_speaking_ms: u64 = 0;
    let mut pause_duration_sum = 0.0;
    let mut confidence_sum = 0.0;
    let mut confidence_count: u32 = 0;
    let mut sentiment_counts: HashMap<Sentiment, u32> = HashMap::new();

    for segment in segments {
        metrics.total_words += segment.word_count();
        metrics.total_duration_ms += segment.duration_ms;
        if segment.speaker == Speaker::User {
            user_speaking_ms += segment.duration_ms;
        }

        metrics.total_questions += segment.question_count();
        if segment.analysis.interruptions.detected {
            metrics.total_interruptions += segment.analysis.interruptions.count.max(1);
        }

        for filler in &segment.analysis.filler_words {
            metrics.total_filler_words += filler.count;
            *metrics
                .filler_word_breakdown
                .entry(filler.word.to_lowercase())
                .or_insert(0) += filler.count;
        }

        metrics.total_stutters += segment.analysis.stutters.len() as u32;

        metrics.total_pauses += segment.analysis.pauses.len() as u32;
        pause_duration_sum += segment
            .analysis
            .pauses
            .iter()
            .map(|p| p.duration)
            .sum::<f64>();

        // A zero score means the oracle gave no reading for the window
        if segment.analysis.confidence.score > 0.0 {
            confidence_sum += segment.analysis.confidence.score;
            confidence_count += 1;
        }

        *metrics
            .tone_breakdown
            .entry(segment.analysis.tone.overall)
            .or_insert(0) += 1;
        *sentiment_counts.entry(segment.analysis.sentiment).or_insert(0) += 1;
    }

    if metrics.total_duration_ms > 0 {
        let minutes = metrics.total_duration_ms as f64 / 60_000.0;
        metrics.avg_words_per_minute = metrics.total_words as f64 / minutes;
        metrics.user_speaking_percent =
            user_speaking_ms as f64 / metrics.total_duration_ms as f64 * 100.0;
    } else {
        metrics.user_speaking_percent = 50.0;
    }

    if metrics.total_words > 0 {
        metrics.filler_word_rate =
            metrics.total_filler_words as f64 / metrics.total_words as f64 * 100.0;
        metrics.stutter_rate =
            metrics.total_stutters as f64 / metrics.total_words as f64 * 100.0;
    }

    if metrics.total_pauses > 0 {
        metrics.avg_pause_duration = pause_duration_sum / metrics.total_pauses as f64;
    }

    metrics.confidence_score = if confidence_count > 0 {
        confidence_sum / confidence_count as f64
    } else {
        50.0
    };

    metrics.overall_tone = mode_with_default(&metrics.tone_breakdown, ToneLabel::Neutral);
    metrics.overall_sentiment = mode_with_default(&sentiment_counts, Sentiment::Neutral);

    Ok(metrics)
}

/// Most frequent key; ties keep the default. Strict comparison so the
/// default only loses to a clear majority.
fn mode_with_default<K: Copy + Eq + std::hash::Hash>(counts: &HashMap<K, u32>, default: K) -> K {
    let mut best = default;
    let mut best_count = counts.get(&default).copied().unwrap_or(0);
    for (key, count) in counts {
        if *key != default && *count > best_count {
            best = *key;
            best_count = *count;
        }
    }
    best
}

/// Weighted-deduction performance score in [0, 100]
pub fn grade_score(metrics: &SummaryMetrics) -> f64 {
    let mut score = 100.0;

    score -= (metrics.filler_word_rate * 2.0).min(20.0);
    score -= (metrics.stutter_rate * 3.0).min(15.0);

    let wpm = metrics.avg_words_per_minute;
    if wpm < 120.0 {
        score -= (120.0 - wpm) * 0.2;
    } else if wpm > 180.0 {
        score -= (wpm - 180.0) * 0.2;
    }

    if metrics.confidence_score < 70.0 {
        score -= (70.0 - metrics.confidence_score) * 0.5;
    }

    if metrics.avg_pause_duration > 2.0 {
        score -= ((metrics.avg_pause_duration - 2.0) * 5.0).min(15.0);
    }

    score.clamp(0.0, 100.0)
}

/// Qualitative observations derived from the aggregated metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Insights {
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub key_patterns: Vec<String>,
}

pub fn derive_insights(metrics: &SummaryMetrics) -> Insights {
    let mut insights = Insights::default();

    if metrics.filler_word_rate < 2.0 {
        insights
            .strengths
            .push("Minimal filler words kept your speech clear.".to_string());
    } else if metrics.filler_word_rate >= 5.0 {
        insights.areas_for_improvement.push(
            "Work on reducing filler words like 'um' and 'uh'.".to_string(),
        );
    }

    if metrics.stutter_rate < 1.0 {
        insights
            .strengths
            .push("Fluent speech with very little stuttering.".to_string());
    } else if metrics.stutter_rate >= 2.0 {
        insights
            .areas_for_improvement
            .push("Work on fluency to smooth out repeated or stuck words.".to_string());
    }

    if metrics.confidence_score >= 75.0 {
        insights
            .strengths
            .push("You projected strong confidence throughout.".to_string());
    } else if metrics.confidence_score < 60.0 {
        insights
            .areas_for_improvement
            .push("Practice projecting more confidence in your delivery.".to_string());
    }

    let wpm = metrics.avg_words_per_minute;
    if (130.0..=170.0).contains(&wpm) {
        insights
            .strengths
            .push("Well-paced delivery in the ideal range.".to_string());
    } else if wpm < 120.0 {
        insights
            .areas_for_improvement
            .push("Try to increase your pace to keep listeners engaged.".to_string());
    } else if wpm > 180.0 {
        insights
            .areas_for_improvement
            .push("Try to slow down for better clarity.".to_string());
    }

    if metrics.avg_pause_duration < 1.5 {
        insights
            .strengths
            .push("Natural, well-timed pauses.".to_string());
    } else if metrics.avg_pause_duration > 2.5 {
        insights
            .areas_for_improvement
            .push("Watch out for long pauses; prepare key points in advance.".to_string());
    }

    if let Some((word, count)) = metrics
        .filler_word_breakdown
        .iter()
        .max_by_key(|entry| (*entry.1, std::cmp::Reverse(entry.0.clone())))
    {
        if *count > 3 {
            insights.key_patterns.push(format!(
                "Most frequent filler word: \"{}\" ({} times).",
                word, count
            ));
        }
    }

    if metrics.overall_tone != ToneLabel::Neutral {
        insights.key_patterns.push(format!(
            "Your overall tone came across as {}.",
            metrics.overall_tone.as_str()
        ));
    }

    insights
}

/// Report card for a finished conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: String,
    pub created_at_ms: i64,
    pub metrics: SummaryMetrics,
    pub grade: Grade,
    pub grade_score: f64,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub key_patterns: Vec<String>,
    /// True when aggregation failed and this is the degraded default report
    pub fallback: bool,
}

impl Summary {
    pub fn build(
        conversation_id: Uuid,
        user_id: &str,
        created_at_ms: i64,
        segments: &[SegmentAnalysis],
    ) -> Result<Self, SummaryError> {
        let metrics = aggregate(segments)?;
        let score = grade_score(&metrics);
        let insights = derive_insights(&metrics);
        Ok(Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: user_id.to_string(),
            created_at_ms,
            grade: Grade::from_score(score),
            grade_score: score,
            metrics,
            strengths: insights.strengths,
            areas_for_improvement: insights.areas_for_improvement,
            key_patterns: insights.key_patterns,
            fallback: false,
        })
    }

    /// Default report used when the stored segments cannot be read back
    pub fn fallback(conversation_id: Uuid, user_id: &str, created_at_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: user_id.to_string(),
            created_at_ms,
            metrics: SummaryMetrics {
                confidence_score: 50.0,
                user_speaking_percent: 50.0,
                ..Default::default()
            },
            grade: Grade::C,
            grade_score: 70.0,
            strengths: Vec::new(),
            areas_for_improvement: Vec::new(),
            key_patterns: vec!["Summary unavailable - showing default report".to_string()],
            fallback: true,
        }
    }

    /// Spoken end-of-conversation report text
    pub fn narrative(&self) -> String {
        let m = &self.metrics;
        let mut parts = vec![format!(
            "Conversation complete. Your grade is {}.",
            self.grade
        )];

        if m.user_speaking_percent > 70.0 {
            parts.push(format!(
                "You did most of the talking at {:.0} percent. Try leaving more room for the other person.",
                m.user_speaking_percent
            ));
        } else if m.user_speaking_percent < 30.0 {
            parts.push(format!(
                "You were fairly quiet, speaking only {:.0} percent of the time.",
                m.user_speaking_percent
            ));
        } else {
            parts.push(format!(
                "The conversation was well balanced, with you speaking {:.0} percent of the time.",
                m.user_speaking_percent
            ));
        }

        if m.total_interruptions == 0 {
            parts.push("You didn't interrupt at all. Well done.".to_string());
        } else if m.total_interruptions <= 2 {
            parts.push(format!(
                "You interrupted {} time{}.",
                m.total_interruptions,
                if m.total_interruptions == 1 { "" } else { "s" }
            ));
        } else {
            parts.push(format!(
                "You interrupted {} times. Try letting others finish their thoughts.",
                m.total_interruptions
            ));
        }

        if m.total_questions == 0 {
            parts.push(
                "You didn't ask any questions. Showing curiosity keeps conversations engaging."
                    .to_string(),
            );
        } else if m.total_questions <= 3 {
            parts.push(format!(
                "You asked {} question{}.",
                m.total_questions,
                if m.total_questions == 1 { "" } else { "s" }
            ));
        } else {
            parts.push(format!(
                "You asked {} questions, which shows great engagement.",
                m.total_questions
            ));
        }

        parts.join(" ")
    }
}
