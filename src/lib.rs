//! Real-time conversational coaching engine.
//!
//! Audio segments (or pre-analyzed segment records) flow through a
//! per-conversation session: oracle analysis, cumulative state, a rule
//! table that may emit one feedback event per segment, and a serialized
//! playback queue. Ending a session recomputes a graded summary from the
//! persisted segments.

pub mod analysis;
pub mod archive;
pub mod config;
pub mod dispatch;
pub mod feedback;
pub mod oracle;
pub mod session;
pub mod state;
pub mod store;
pub mod summary;

pub use analysis::{Analysis, SegmentAnalysis, Speaker};
pub use config::CoachConfig;
pub use dispatch::{FeedbackDispatcher, LoggingSink, PlaybackSink};
pub use feedback::{Feedback, FeedbackEvaluator, FeedbackKind};
pub use oracle::{AnalysisOracle, GeminiOracle};
pub use session::{CoachSession, SessionDeps};
pub use state::ConversationState;
pub use store::{ConversationStore, MemoryStore, SegmentStore, SummaryStore};
pub use summary::{Grade, Summary, SummaryMetrics};
