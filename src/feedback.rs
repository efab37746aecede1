//! Real-time feedback evaluation.
//!
//! Turns (ConversationState, latest segment, clock) into at most one
//! feedback event per call. Conditions live in a declarative rule table so
//! new kinds are added as data (kind, priority, predicate) rather than as
//! branching code. Global pacing comes from a cooldown between emissions
//! plus an initial grace period, and most kinds fire at most once per
//! session (configurable).

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::analysis::{SegmentAnalysis, Sentiment, StutterKind, ToneLabel};
use crate::config::CoachConfig;
use crate::state::ConversationState;

/// Condition categories a feedback event can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Stutter,
    Monologue,
    Interruption,
    BalanceTalkative,
    BalanceQuiet,
    PaceFast,
    PaceSlow,
    FillerWords,
    QuestionPrompt,
    ConfidenceLow,
    ConfidenceHigh,
    ToneNervous,
    SentimentPositive,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stutter => "stutter",
            Self::Monologue => "monologue",
            Self::Interruption => "interruption",
            Self::BalanceTalkative => "balance_talkative",
            Self::BalanceQuiet => "balance_quiet",
            Self::PaceFast => "pace_fast",
            Self::PaceSlow => "pace_slow",
            Self::FillerWords => "filler_words",
            Self::QuestionPrompt => "question_prompt",
            Self::ConfidenceLow => "confidence_low",
            Self::ConfidenceHigh => "confidence_high",
            Self::ToneNervous => "tone_nervous",
            Self::SentimentPositive => "sentiment_positive",
        }
    }
}

/// A coaching message selected for real-time delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub message: String,
    pub priority: u8,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Everything a rule predicate may look at
pub(crate) struct RuleContext<'a> {
    pub config: &'a CoachConfig,
    pub state: &'a ConversationState,
    pub segment: &'a SegmentAnalysis,
    pub now_ms: i64,
}

pub(crate) struct Rule {
    pub kind: FeedbackKind,
    pub priority: u8,
    pub check: fn(&RuleContext) -> Option<(String, serde_json::Value)>,
}

/// Ordered rule battery. Priority 3 is highest; within a priority tier the
/// table order breaks ties (the sort below is stable).
pub(crate) const RULES: &[Rule] = &[
    Rule {
        kind: FeedbackKind::Stutter,
        priority: 3,
        check: check_stutter,
    },
    Rule {
        kind: FeedbackKind::Monologue,
        priority: 2,
        check: check_monologue,
    },
    Rule {
        kind: FeedbackKind::Interruption,
        priority: 2,
        check: check_interruption,
    },
    Rule {
        kind: FeedbackKind::BalanceTalkative,
        priority: 2,
        check: check_balance_talkative,
    },
    Rule {
        kind: FeedbackKind::BalanceQuiet,
        priority: 2,
        check: check_balance_quiet,
    },
    Rule {
        kind: FeedbackKind::PaceFast,
        priority: 1,
        check: check_pace_fast,
    },
    Rule {
        kind: FeedbackKind::PaceSlow,
        priority: 1,
        check: check_pace_slow,
    },
    Rule {
        kind: FeedbackKind::FillerWords,
        priority: 1,
        check: check_filler_words,
    },
    Rule {
        kind: FeedbackKind::QuestionPrompt,
        priority: 1,
        check: check_question_prompt,
    },
    Rule {
        kind: FeedbackKind::ConfidenceLow,
        priority: 1,
        check: check_confidence_low,
    },
    Rule {
        kind: FeedbackKind::ConfidenceHigh,
        priority: 1,
        check: check_confidence_high,
    },
    Rule {
        kind: FeedbackKind::ToneNervous,
        priority: 1,
        check: check_tone_nervous,
    },
    Rule {
        kind: FeedbackKind::SentimentPositive,
        priority: 1,
        check: check_sentiment_positive,
    },
];

fn check_stutter(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let stutters = &ctx.segment.analysis.stutters;
    let dominant = ctx.segment.analysis.dominant_stutter_kind()?;
    let message = match dominant {
        StutterKind::Repetition => {
            "I noticed some repeated words. Take a breath and slow down.".to_string()
        }
        StutterKind::Prolongation => {
            "Some sounds are getting stretched out. Relax and ease into your words.".to_string()
        }
        StutterKind::Block => {
            "You seem to be getting stuck on some words. Pause, breathe, and start again gently."
                .to_string()
        }
    };
    Some((message, json!({ "count": stutters.len() })))
}

fn check_monologue(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let runs = ctx.state.consecutive_user_segments;
    if runs < ctx.config.monologue_segment_threshold {
        return None;
    }
    let monologue_ms = runs as u64 * ctx.config.segment_duration_ms;
    Some((
        format!(
            "You've been speaking for {} seconds. Pause and let the other person respond.",
            monologue_ms / 1000
        ),
        json!({ "durationMs": monologue_ms }),
    ))
}

fn check_interruption(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let count = ctx.state.interruption_count;
    if count < 1 {
        return None;
    }
    let times = if count == 1 { "time" } else { "times" };
    Some((
        format!(
            "You've interrupted {} {}. Practice active listening.",
            count, times
        ),
        json!({ "count": count }),
    ))
}

fn check_balance_talkative(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    if ctx.now_ms - ctx.state.started_at_ms() <= ctx.config.balance_min_duration_ms {
        return None;
    }
    let percent = ctx.state.speaking_percent();
    if percent <= ctx.config.max_speaking_percent {
        return None;
    }
    Some((
        format!(
            "You're doing {:.0}% of the talking. Try listening more.",
            percent
        ),
        json!({ "speakingPercent": percent }),
    ))
}

fn check_balance_quiet(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    if ctx.now_ms - ctx.state.started_at_ms() <= ctx.config.balance_min_duration_ms {
        return None;
    }
    let percent = ctx.state.speaking_percent();
    if percent >= ctx.config.min_speaking_percent {
        return None;
    }
    Some((
        format!(
            "You're only doing {:.0}% of the talking. Share more of your thoughts.",
            percent
        ),
        json!({ "speakingPercent": percent }),
    ))
}

fn check_pace_fast(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let wpm = ctx.state.current_wpm();
    if wpm <= ctx.config.fast_pace_wpm {
        return None;
    }
    Some((
        format!(
            "You're speaking at {:.0} words per minute - that's quite fast. \
             Try slowing down for better clarity.",
            wpm
        ),
        json!({ "wpm": wpm }),
    ))
}

fn check_pace_slow(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let wpm = ctx.state.current_wpm();
    // Lower bound excludes near-silence from triggering "speed up"
    if wpm >= ctx.config.slow_pace_wpm || wpm <= ctx.config.min_voiced_wpm {
        return None;
    }
    Some((
        format!(
            "You're speaking at {:.0} words per minute - try picking up the pace \
             a bit to maintain engagement.",
            wpm
        ),
        json!({ "wpm": wpm }),
    ))
}

fn check_filler_words(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let count = ctx.segment.filler_count();
    if count < ctx.config.filler_threshold {
        return None;
    }
    Some((
        format!("You used {} filler words. Try pausing instead.", count),
        json!({ "count": count }),
    ))
}

fn check_question_prompt(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    if ctx.state.question_count > 0 {
        return None;
    }
    let since = ctx.state.time_since_last_question_ms(ctx.now_ms);
    if since <= ctx.config.question_prompt_ms {
        return None;
    }
    Some((
        "Try asking an open-ended question to engage the other person.".to_string(),
        json!({ "timeSinceQuestionMs": since }),
    ))
}

fn check_confidence_low(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let score = ctx.segment.analysis.confidence.score;
    if score >= ctx.config.low_confidence_score {
        return None;
    }
    Some((
        "You sound a little hesitant. Trust what you're saying.".to_string(),
        json!({ "confidence": score }),
    ))
}

fn check_confidence_high(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    let score = ctx.segment.analysis.confidence.score;
    if score <= ctx.config.high_confidence_score {
        return None;
    }
    Some((
        "You sound confident - keep that energy going.".to_string(),
        json!({ "confidence": score }),
    ))
}

fn check_tone_nervous(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    if ctx.segment.analysis.tone.overall != ToneLabel::Nervous {
        return None;
    }
    Some((
        "Take a slow breath - you've got this.".to_string(),
        serde_json::Value::Null,
    ))
}

fn check_sentiment_positive(ctx: &RuleContext) -> Option<(String, serde_json::Value)> {
    if ctx.segment.analysis.sentiment != Sentiment::Positive {
        return None;
    }
    Some((
        "Great positive energy - the other person can feel it.".to_string(),
        serde_json::Value::Null,
    ))
}

/// Pure decision function: no I/O, deterministic given identical inputs
/// and clock
pub struct FeedbackEvaluator {
    config: CoachConfig,
}

impl FeedbackEvaluator {
    pub fn new(config: CoachConfig) -> Self {
        Self { config }
    }

    /// Evaluate the rule battery against the updated state and latest
    /// segment, returning at most one feedback event.
    ///
    /// When the winning candidate's kind was already emitted this session
    /// (and is configured one-shot), the call returns None rather than
    /// falling back to the next candidate. Repeating a lower-priority
    /// nudge in its place would read as nagging.
    pub fn evaluate(
        &self,
        state: &mut ConversationState,
        segment: &SegmentAnalysis,
        now_ms: i64,
    ) -> Option<Feedback> {
        if let Some(last) = state.last_feedback_timestamp_ms {
            if now_ms - last < self.config.cooldown_ms {
                return None;
            }
        }
        if now_ms - state.started_at_ms() < self.config.grace_ms {
            return None;
        }

        let ctx = RuleContext {
            config: &self.config,
            state,
            segment,
            now_ms,
        };

        let mut candidates: Vec<Feedback> = Vec::new();
        for rule in RULES {
            if let Some((message, metadata)) = (rule.check)(&ctx) {
                candidates.push(Feedback {
                    kind: rule.kind,
                    message,
                    priority: rule.priority,
                    metadata,
                });
            }
        }
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        let winner = candidates.into_iter().next().expect("non-empty");

        if self.config.one_shot_kinds.contains(&winner.kind)
            && state.feedback_given.contains(&winner.kind)
        {
            debug!(kind = winner.kind.as_str(), "feedback already given, suppressing");
            return None;
        }

        state.last_feedback_timestamp_ms = Some(now_ms);
        state.feedback_given.insert(winner.kind);
        debug!(
            kind = winner.kind.as_str(),
            priority = winner.priority,
            "feedback triggered"
        );
        Some(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FillerWord, SegmentAnalysis, Speaker, Stutter};

    fn config() -> CoachConfig {
        CoachConfig::default()
    }

    fn quiet_segment(timestamp_ms: i64) -> SegmentAnalysis {
        SegmentAnalysis {
            transcript: "just a normal sentence with several plain words here".to_string(),
            speaker: Speaker::User,
            timestamp_ms,
            duration_ms: 7000,
            ..Default::default()
        }
    }

    /// Feed enough balanced turns that no pace/balance rule fires
    fn neutral_state(now_ms: i64) -> ConversationState {
        let mut state = ConversationState::new(0);
        // ~150 wpm, alternating speakers, one question asked
        let mut ts = 0;
        for i in 0..4 {
            let speaker = if i % 2 == 0 {
                Speaker::User
            } else {
                Speaker::Other
            };
            let mut seg = SegmentAnalysis {
                transcript: "word ".repeat(17).trim().to_string(),
                speaker,
                timestamp_ms: ts,
                duration_ms: 7000,
                ..Default::default()
            };
            if i == 1 {
                seg.transcript.push('?');
                seg.timestamp_ms = now_ms - 1000;
            }
            state.update(&seg);
            ts += 7000;
        }
        state
    }

    #[test]
    fn test_grace_period_suppresses_feedback() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = ConversationState::new(0);
        let mut seg = quiet_segment(1000);
        seg.analysis.filler_words = vec![FillerWord {
            word: "um".into(),
            count: 5,
        }];
        state.update(&seg);
        // Within the 5s grace window
        assert!(evaluator.evaluate(&mut state, &seg, 3000).is_none());
        // After grace, the same condition fires
        assert!(evaluator.evaluate(&mut state, &seg, 6000).is_some());
    }

    #[test]
    fn test_cooldown_between_emissions() {
        let cfg = config();
        let cooldown = cfg.cooldown_ms;
        let evaluator = FeedbackEvaluator::new(cfg);
        let mut state = neutral_state(40_000);

        let mut seg = quiet_segment(40_000);
        seg.analysis.filler_words = vec![FillerWord {
            word: "um".into(),
            count: 3,
        }];
        state.update(&seg);
        let first = evaluator.evaluate(&mut state, &seg, 40_000);
        assert!(first.is_some());

        // Any further condition is suppressed inside the cooldown window,
        // even a higher-priority one
        let mut seg2 = quiet_segment(41_000);
        seg2.analysis.stutters = vec![Stutter::default()];
        state.update(&seg2);
        assert!(evaluator
            .evaluate(&mut state, &seg2, 40_000 + cooldown - 1)
            .is_none());
        assert!(evaluator
            .evaluate(&mut state, &seg2, 40_000 + cooldown)
            .is_some());
    }

    #[test]
    fn test_filler_words_feedback_references_count() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = neutral_state(40_000);
        let mut seg = quiet_segment(40_000);
        seg.analysis.filler_words = vec![FillerWord {
            word: "um".into(),
            count: 3,
        }];
        state.update(&seg);

        let feedback = evaluator.evaluate(&mut state, &seg, 40_000).unwrap();
        assert_eq!(feedback.kind, FeedbackKind::FillerWords);
        assert!(feedback.message.contains("3 filler words"));
        assert_eq!(feedback.metadata["count"], 3);
    }

    #[test]
    fn test_monologue_after_consecutive_user_segments() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = ConversationState::new(0);

        // Three consecutive 7s user segments of 20/18/22 words: balanced
        // pace, monologue threshold (2) exceeded. The first segment asks a
        // question so the question-prompt rule stays quiet.
        let words = [
            format!("{}?", "word ".repeat(20).trim()),
            "word ".repeat(18).trim().to_string(),
            "word ".repeat(22).trim().to_string(),
        ];
        let mut feedbacks = Vec::new();
        for (i, text) in words.iter().enumerate() {
            let seg = SegmentAnalysis {
                transcript: text.clone(),
                speaker: Speaker::User,
                timestamp_ms: i as i64 * 7000,
                duration_ms: 7000,
                ..Default::default()
            };
            state.update(&seg);
            // Clock well past grace, question prompt not yet due
            if let Some(f) = evaluator.evaluate(&mut state, &seg, 6000 + i as i64 * 7000) {
                feedbacks.push(f);
            }
        }
        assert_eq!(state.consecutive_user_segments, 3);
        assert_eq!(feedbacks.len(), 1);
        assert_eq!(feedbacks[0].kind, FeedbackKind::Monologue);
        assert!(feedbacks[0].message.contains("seconds"));
    }

    #[test]
    fn test_one_shot_kind_never_repeats() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = neutral_state(40_000);

        let mut seg = quiet_segment(40_000);
        seg.analysis.interruptions.detected = true;
        seg.analysis.interruptions.count = 1;
        state.update(&seg);
        let first = evaluator.evaluate(&mut state, &seg, 40_000).unwrap();
        assert_eq!(first.kind, FeedbackKind::Interruption);

        // Same condition well past the cooldown: suppressed for the session.
        // The other party speaks so the monologue rule stays out of the way.
        let mut seg2 = quiet_segment(60_000);
        seg2.speaker = Speaker::Other;
        state.update(&seg2);
        assert!(evaluator.evaluate(&mut state, &seg2, 60_000).is_none());
    }

    #[test]
    fn test_stutter_outranks_filler_words() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = neutral_state(40_000);
        let mut seg = quiet_segment(40_000);
        seg.analysis.filler_words = vec![FillerWord {
            word: "um".into(),
            count: 4,
        }];
        seg.analysis.stutters = vec![Stutter {
            word: "s-so".into(),
            timestamp: 0.2,
            kind: StutterKind::Block,
        }];
        state.update(&seg);

        let feedback = evaluator.evaluate(&mut state, &seg, 40_000).unwrap();
        assert_eq!(feedback.kind, FeedbackKind::Stutter);
        assert!(feedback.message.contains("stuck"));
    }

    #[test]
    fn test_suppressed_winner_does_not_fall_back() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = neutral_state(40_000);
        state.feedback_given.insert(FeedbackKind::Stutter);

        let mut seg = quiet_segment(40_000);
        seg.analysis.stutters = vec![Stutter::default()];
        seg.analysis.filler_words = vec![FillerWord {
            word: "like".into(),
            count: 3,
        }];
        state.update(&seg);

        // Stutter wins the sort but was already given; no fallback to the
        // filler candidate
        assert!(evaluator.evaluate(&mut state, &seg, 40_000).is_none());
    }

    #[test]
    fn test_pace_recurs_after_cooldown() {
        let cfg = config();
        assert!(!cfg.one_shot_kinds.contains(&FeedbackKind::PaceFast));
        let evaluator = FeedbackEvaluator::new(cfg);
        let mut state = ConversationState::new(0);

        // 250 wpm over one segment and a question so question_prompt stays out
        let mut seg = SegmentAnalysis {
            transcript: format!("{}?", "word ".repeat(29).trim()),
            speaker: Speaker::User,
            timestamp_ms: 0,
            duration_ms: 7000,
            ..Default::default()
        };
        state.update(&seg);
        let first = evaluator.evaluate(&mut state, &seg, 10_000).unwrap();
        assert_eq!(first.kind, FeedbackKind::PaceFast);

        // A reply from the other party keeps the monologue rule quiet while
        // the running pace stays high
        seg.timestamp_ms = 7000;
        seg.speaker = Speaker::Other;
        state.update(&seg);
        let second = evaluator.evaluate(&mut state, &seg, 30_000).unwrap();
        assert_eq!(second.kind, FeedbackKind::PaceFast);
    }

    #[test]
    fn test_balance_gated_on_elapsed_time() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = ConversationState::new(0);

        // Five user segments, one reply: 83% user share at a balanced pace.
        // The closing reply resets the monologue run so the balance rule is
        // the only candidate in its tier.
        for i in 0..6 {
            let speaker = if i == 5 { Speaker::Other } else { Speaker::User };
            let mut seg = SegmentAnalysis {
                transcript: "word ".repeat(17).trim().to_string(),
                speaker,
                timestamp_ms: i * 7000,
                duration_ms: 7000,
                ..Default::default()
            };
            if i == 0 {
                seg.transcript.push('?');
            }
            state.update(&seg);
        }
        let seg = quiet_segment(42_000);

        // Before the 30s gate the talkative condition is ineligible
        let mut early = ConversationState::new(0);
        early.user_speaking_ms = 14_000;
        early.total_duration_ms = 14_000;
        early.total_words = 34;
        early.question_count = 1;
        assert!(evaluator.evaluate(&mut early, &seg, 20_000).is_none());

        // Past the gate it fires and reports the share
        let f = evaluator.evaluate(&mut state, &seg, 43_000).unwrap();
        assert_eq!(f.kind, FeedbackKind::BalanceTalkative);
        assert!(f.message.contains("83%"));
    }

    #[test]
    fn test_question_prompt_when_no_questions() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = ConversationState::new(0);
        // Balanced two-party exchange, no questions, normal pace
        for i in 0..2 {
            let speaker = if i % 2 == 0 {
                Speaker::User
            } else {
                Speaker::Other
            };
            let seg = SegmentAnalysis {
                transcript: "word ".repeat(17).trim().to_string(),
                speaker,
                timestamp_ms: i * 7000,
                duration_ms: 7000,
                ..Default::default()
            };
            state.update(&seg);
        }
        let seg = quiet_segment(14_000);
        let f = evaluator.evaluate(&mut state, &seg, 16_000).unwrap();
        assert_eq!(f.kind, FeedbackKind::QuestionPrompt);
    }

    #[test]
    fn test_no_feedback_when_nothing_fires() {
        let evaluator = FeedbackEvaluator::new(config());
        let mut state = neutral_state(14_000);
        let seg = quiet_segment(14_000);
        assert!(evaluator.evaluate(&mut state, &seg, 14_000).is_none());
    }
}
