// Speech-to-text for audio chunks
//
// The pipeline only depends on the `Transcriber` trait. The shipped
// implementation drives the whisper.cpp CLI; tests use in-memory stubs.

pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use whisper_cpp::WhisperCppTranscriber;
use crate::config::TranscriberConfig;
use crate::error::Result;
use crate::segment::Segment;

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio chunk into timed segments, relative to the chunk start.
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Vec<Segment>>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_default(config: TranscriberConfig) -> Arc<dyn Transcriber> {
        Arc::new(WhisperCppTranscriber::new(config))
    }
}
