//! Kotoba - learner-specific subtitle vocabulary filtering
//!
//! Turns transcribed subtitle chunks into learner-aware subtitles: every word
//! is validated, resolved against a vocabulary store and checked against what
//! the learner already knows, and only the lines with unknown words go to the
//! translator.

pub mod cli;
pub mod classifier;
pub mod config;
pub mod error;
pub mod filter;
pub mod language;
pub mod learner;
pub mod level;
pub mod pipeline;
pub mod progress;
pub mod segment;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod validator;
pub mod vocabulary;
pub mod workflow;

#[cfg(test)]
mod test_support;
