use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use convocoach::analysis::SegmentAnalysis;
use convocoach::archive::JsonArchive;
use convocoach::config::CoachConfig;
use convocoach::dispatch::{PlaybackError, PlaybackSink};
use convocoach::feedback::Feedback;
use convocoach::session::{CoachSession, SessionDeps};
use convocoach::store::MemoryStore;
use convocoach::summary::Summary;

/// Headless conversational coaching engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a recorded conversation through a live session, printing
    /// feedback as it would have fired, then the report card
    Replay {
        /// JSONL file with one analyzed segment per line
        #[arg(short, long)]
        input: PathBuf,

        /// Persist the conversation to this archive directory
        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// User id to record the conversation under
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Aggregate a recorded conversation directly and print the report card
    Grade {
        /// JSONL file with one analyzed segment per line
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// Prints feedback the way a voice sink would speak it
struct ConsoleSink;

#[async_trait]
impl PlaybackSink for ConsoleSink {
    async fn speak(&self, feedback: &Feedback) -> Result<(), PlaybackError> {
        println!("  [feedback:{}] {}", feedback.kind.as_str(), feedback.message);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = CoachConfig::default_config_dir()?.join("config.json");
    let config = CoachConfig::load(&config_path)?;

    match args.command {
        Command::Replay {
            input,
            archive_dir,
            user,
        } => replay(config, &input, archive_dir, &user).await,
        Command::Grade { input } => grade(&input),
    }
}

fn read_segments(path: &Path) -> Result<Vec<SegmentAnalysis>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read segment file {:?}", path))?;
    let mut segments = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let segment: SegmentAnalysis = serde_json::from_str(line)
            .with_context(|| format!("Invalid segment record on line {}", number + 1))?;
        segments.push(segment);
    }
    if segments.is_empty() {
        anyhow::bail!("No segments found in {:?}", path);
    }
    Ok(segments)
}

async fn replay(
    config: CoachConfig,
    input: &Path,
    archive_dir: Option<PathBuf>,
    user: &str,
) -> Result<()> {
    let segments = read_segments(input)?;

    // Anchor the session one window before the first segment so grace and
    // cooldown line up with the recorded timestamps
    let started_at_ms = segments[0].timestamp_ms - config.segment_duration_ms as i64;
    let last = segments.last().map(|s| s.timestamp_ms + s.duration_ms as i64);
    let ended_at_ms = last.unwrap_or(started_at_ms);

    let sink = Arc::new(ConsoleSink);
    let deps = match archive_dir {
        Some(dir) => {
            let archive = Arc::new(JsonArchive::new(dir)?);
            SessionDeps {
                oracle: None,
                playback: sink,
                conversations: archive.clone(),
                segments: archive.clone(),
                summaries: archive,
            }
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            SessionDeps {
                oracle: None,
                playback: sink,
                conversations: store.clone(),
                segments: store.clone(),
                summaries: store,
            }
        }
    };

    let session =
        CoachSession::start_with_clock(config, deps, user, None, started_at_ms).await?;
    info!(conversation_id = %session.conversation_id(), "Replaying {} segments", segments.len());

    println!("Replaying {} segments...\n", segments.len());
    for segment in segments {
        println!(
            "[{:>7.1}s] {}: {}",
            (segment.timestamp_ms - started_at_ms) as f64 / 1000.0,
            match segment.speaker {
                convocoach::Speaker::User => "you",
                convocoach::Speaker::Other => "them",
            },
            segment.transcript
        );
        // The slot holds at most one waiting segment; yield until it frees
        while !session.ingest_analysis(segment.clone()) {
            tokio::task::yield_now().await;
        }
    }

    let summary = session.end_at(ended_at_ms).await?;
    print_report(&summary);
    Ok(())
}

fn grade(input: &Path) -> Result<()> {
    let segments = read_segments(input)?;
    let created_at_ms = segments.last().map(|s| s.timestamp_ms).unwrap_or(0);
    let summary = Summary::build(Uuid::new_v4(), "local", created_at_ms, &segments)?;
    print_report(&summary);
    Ok(())
}

fn print_report(summary: &Summary) {
    let m = &summary.metrics;
    println!("\n--- Report Card ---");
    println!("Grade: {} ({:.1}/100)", summary.grade, summary.grade_score);
    println!(
        "Segments: {}  Words: {}  Pace: {:.0} wpm",
        m.total_segments, m.total_words, m.avg_words_per_minute
    );
    println!(
        "Filler words: {} ({:.1}%)  Stutters: {} ({:.1}%)",
        m.total_filler_words, m.filler_word_rate, m.total_stutters, m.stutter_rate
    );
    println!(
        "Confidence: {:.0}  Tone: {}  Sentiment: {}",
        m.confidence_score,
        m.overall_tone.as_str(),
        m.overall_sentiment.as_str()
    );
    println!(
        "Speaking share: {:.0}%  Interruptions: {}  Questions: {}",
        m.user_speaking_percent, m.total_interruptions, m.total_questions
    );

    if !summary.strengths.is_empty() {
        println!("\nStrengths:");
        for line in &summary.strengths {
            println!("  + {}", line);
        }
    }
    if !summary.areas_for_improvement.is_empty() {
        println!("\nAreas for improvement:");
        for line in &summary.areas_for_improvement {
            println!("  - {}", line);
        }
    }
    if !summary.key_patterns.is_empty() {
        println!("\nPatterns:");
        for line in &summary.key_patterns {
            println!("  * {}", line);
        }
    }

    println!("\n{}", summary.narrative());
}
