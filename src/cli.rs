use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Filter an existing transcript (.json or .srt) for a learner
    Filter {
        /// Input transcript file
        #[arg(short, long)]
        input: PathBuf,

        /// Learner id
        #[arg(short, long)]
        user: String,

        /// Language spoken in the transcript
        #[arg(short, long)]
        source_lang: String,

        /// Language to translate blocker lines into
        #[arg(short, long, default_value = "en")]
        target_lang: String,

        /// Words learned since the profile was saved (comma-separated)
        #[arg(short, long)]
        learned: Option<String>,

        /// Output directory for the subtitle and artifact files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Transcribe an audio chunk with whisper.cpp and filter it
    Process {
        /// Input audio file
        #[arg(short, long)]
        input: PathBuf,

        /// Learner id
        #[arg(short, long)]
        user: String,

        /// Language spoken in the audio
        #[arg(short, long)]
        source_lang: String,

        /// Language to translate blocker lines into
        #[arg(short, long, default_value = "en")]
        target_lang: String,

        /// Start of the chunk in the full media, in seconds
        #[arg(long, default_value = "0")]
        offset: f64,

        /// Words learned since the profile was saved (comma-separated)
        #[arg(short, long)]
        learned: Option<String>,

        /// Output directory for the subtitle and artifact files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Process all transcripts and audio chunks in a directory
    Batch {
        /// Input directory containing chunks
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Learner id
        #[arg(short, long)]
        user: String,

        /// Language spoken in the chunks
        #[arg(short, long)]
        source_lang: String,

        /// Language to translate blocker lines into
        #[arg(short, long, default_value = "en")]
        target_lang: String,

        /// Output directory for the subtitle and artifact files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Add words to a learner's known-word profile
    Learn {
        /// Learner id
        #[arg(short, long)]
        user: String,

        /// Language of the words
        #[arg(short, long)]
        language: String,

        /// Words to mark as known
        #[arg(required = true)]
        words: Vec<String>,
    },

    /// List the loaded language tables
    Languages,

    /// Write the default configuration to a file
    InitConfig {
        /// Output configuration file
        #[arg(short, long, default_value = "kotoba.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Split a comma-separated word list, dropping blanks.
pub fn parse_word_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
