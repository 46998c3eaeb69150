//! Kotoba - learner-specific subtitle vocabulary filtering
//!
//! Command-line entry point: filters transcripts or transcribed audio chunks
//! for one learner and writes annotated subtitles plus the full artifact.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kotoba::cli::{parse_word_list, Args, Commands};
use kotoba::config::Config;
use kotoba::filter::KnownWords;
use kotoba::language::{LanguageRegistry, ProperNameRule};
use kotoba::learner::ProfileKnownWords;
use kotoba::pipeline::{ChunkArtifact, ChunkJob, ChunkSource};
use kotoba::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "kotoba.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;
    info!("Starting Kotoba - learner-specific subtitle filtering");

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Filter {
            input,
            user,
            source_lang,
            target_lang,
            learned,
            output_dir,
        } => {
            let workflow = Workflow::new(config).await?;
            let job = with_learned(
                ChunkJob::new(user, ChunkSource::Transcript(input), source_lang, target_lang),
                learned.as_deref(),
            );
            let artifact = workflow.process_single_file(job, output_dir.as_deref()).await?;
            print_summary(&artifact);
        }
        Commands::Process {
            input,
            user,
            source_lang,
            target_lang,
            offset,
            learned,
            output_dir,
        } => {
            let workflow = Workflow::new(config).await?;
            let job = with_learned(
                ChunkJob::new(user, ChunkSource::Audio(input), source_lang, target_lang).with_offset(offset),
                learned.as_deref(),
            );
            let artifact = workflow.process_single_file(job, output_dir.as_deref()).await?;
            print_summary(&artifact);
        }
        Commands::Batch {
            input_dir,
            user,
            source_lang,
            target_lang,
            output_dir,
        } => {
            let workflow = Workflow::new(config).await?;
            let report = workflow
                .process_directory(&input_dir, &user, &source_lang, &target_lang, output_dir.as_deref())
                .await?;

            println!(
                "\n{} complete, {} failed, {} cancelled",
                report.completed.len(),
                report.failed.len(),
                report.cancelled.len()
            );
            for (path, error) in &report.failed {
                println!("  {} - {}", path.display(), error);
            }
        }
        Commands::Learn { user, language, words } => {
            let profiles = ProfileKnownWords::new(&config.learner.profiles_dir, config.learner.default_level);
            let added = profiles.mark_known(&user, &language, &words).await?;
            println!("Added {} new words to {}'s {} profile", added, user, language);
        }
        Commands::Languages => {
            let registry = LanguageRegistry::load(config.vocabulary.languages_path.as_deref())?;

            println!("\nLanguage Tables:");
            println!(
                "{:<6} {:<15} {:<10} {:<14} {:<14} {:<12}",
                "Code", "Name", "Min len", "Interjections", "Suffix rules", "Proper names"
            );
            println!("{}", "-".repeat(75));
            for profile in registry.profiles() {
                println!(
                    "{:<6} {:<15} {:<10} {:<14} {:<14} {:<12}",
                    profile.code,
                    profile.name,
                    profile.min_word_length,
                    profile.interjections.len(),
                    profile.suffix_rules.len(),
                    match profile.proper_names {
                        ProperNameRule::Capitalized => "capitalized",
                        ProperNameRule::None => "none",
                    }
                );
            }
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

fn with_learned(job: ChunkJob, learned: Option<&str>) -> ChunkJob {
    match learned {
        Some(list) => job.with_learned_words(parse_word_list(list).into_iter().collect::<KnownWords>()),
        None => job,
    }
}

fn print_summary(artifact: &ChunkArtifact) {
    let stats = &artifact.filtering.statistics;

    println!("\nLearner '{}' at {}:", artifact.user_id, artifact.proficiency_level);
    println!("{:<20} {:>8}", "Words", stats.total_words);
    println!("{:<20} {:>8}", "Known", stats.known_count);
    println!("{:<20} {:>8}", "Unknown", stats.unknown_count);
    println!("{:<20} {:>8}", "Skipped", stats.skipped_count);
    println!("{:<20} {:>8}", "Blocker lines", stats.blocker_segment_count);
    println!("{:<20} {:>8}", "Clear lines", stats.clear_segment_count);
    if artifact.translation.translation_failed {
        println!("Translation failed; subtitles carry markup only");
    }

    if !artifact.vocabulary.is_empty() {
        println!("\nWords to study:");
        println!("{:<20} {:<20} {:<6} {:>8}", "Word", "Lemma", "Level", "Seen");
        println!("{}", "-".repeat(57));
        for item in &artifact.vocabulary {
            let level = item
                .level
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{:<20} {:<20} {:<6} {:>7.1}s",
                item.surface, item.lemma, level, item.first_seen
            );
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".kotoba").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard must outlive every log call
    let file_appender = rolling::daily(&log_dir, "kotoba.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("kotoba.log").display()
    );

    Ok(())
}
