//! Core abstractions for edgepool.
//!
//! This crate defines the data model shared by the worker pool and the
//! execution units it manages, the message contract that flows between them,
//! and the traits a concrete inference backend implements.

pub mod messages;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use messages::{ProgressSink, UnitEvent, UnitRequest};
pub use tokio_util::sync::CancellationToken;

/// Ordered key/value parameters attached to an inference task.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Result type for backend operations.
pub type UnitResult<T> = std::result::Result<T, UnitError>;

/// The kind of on-device model an execution unit is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    /// Text-to-image diffusion.
    ImageGeneration,
    /// Image understanding (captioning, visual question answering).
    Vision,
    /// Speech recognition.
    SpeechAsr,
    /// Speech synthesis.
    SpeechTts,
}

impl ModelType {
    /// Every supported model type.
    pub const ALL: [Self; 4] = [Self::ImageGeneration, Self::Vision, Self::SpeechAsr, Self::SpeechTts];

    /// Returns the wire name of the model type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ImageGeneration => "image-generation",
            Self::Vision => "vision",
            Self::SpeechAsr => "speech-asr",
            Self::SpeechTts => "speech-tts",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown model type name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown model type: {0}")]
pub struct ParseModelTypeError(pub String);

impl FromStr for ModelType {
    type Err = ParseModelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|model_type| model_type.as_str() == s)
            .ok_or_else(|| ParseModelTypeError(s.to_string()))
    }
}

/// Input or output data of an inference call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// A text prompt, transcript or caption.
    Text(String),
    /// Raw bytes such as an encoded image or audio clip (base64 on the wire).
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Payload {
    /// Returns the text content, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the payload as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload carries no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// A unit of work submitted against a worker handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceTask {
    /// The model type the task is meant for.
    pub model_type: ModelType,
    /// The task input.
    pub input: Payload,
    /// Model-specific parameters (e.g. `steps`, `language`).
    #[serde(default)]
    pub parameters: Parameters,
    /// Optional caller-owned cancellation token.
    ///
    /// Cancellation is cooperative: the backend observes the token at its own
    /// checkpoints, so a backend that never polls it still completes normally.
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl InferenceTask {
    /// Creates a task with no parameters and no cancellation token.
    #[must_use]
    pub fn new(model_type: ModelType, input: impl Into<Payload>) -> Self {
        Self { model_type, input: input.into(), parameters: Parameters::new(), cancellation: None }
    }

    /// Adds a parameter to the task.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Attaches a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Reads an unsigned integer parameter.
    #[must_use]
    pub fn parameter_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(serde_json::Value::as_u64)
    }
}

/// Metadata attached to an inference result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceMetadata {
    /// Wall-clock duration of the inference call, measured by the scheduler.
    #[serde(default)]
    pub inference_time_ms: u64,
    /// Version of the weights that produced the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Backend-specific extra fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// What a backend hands back for a completed task.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutput {
    /// The produced output.
    pub output: Payload,
    /// Backend-reported metadata.
    pub metadata: InferenceMetadata,
}

/// The result delivered to the caller of an inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// The model type that produced the output.
    pub model_type: ModelType,
    /// The produced output.
    pub output: Payload,
    /// Timing and model metadata.
    pub metadata: InferenceMetadata,
}

/// Errors reported by an inference backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitError {
    /// The computation failed.
    #[error("Inference failed: {0}")]
    Failed(String),

    /// The computation observed its cancellation token and stopped.
    #[error("Inference cancelled")]
    Cancelled,

    /// The model weights could not be obtained or loaded.
    #[error("Weights unavailable: {0}")]
    Weights(String),

    /// The request does not fit this backend.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// An inference backend running inside one execution unit.
///
/// A backend is bound to exactly one model type for its lifetime and owns
/// whatever acceleration context it needs. It is driven by a single execution
/// unit, so calls never overlap.
#[async_trait]
pub trait InferenceBackend: Send {
    /// Returns the model type this backend serves.
    fn model_type(&self) -> ModelType;

    /// Prepares the backend (acquire device, load weights).
    ///
    /// # Errors
    /// Returns a `UnitError` if the backend cannot become ready.
    async fn initialize(&mut self, progress: &ProgressSink) -> UnitResult<()>;

    /// Runs one inference task.
    ///
    /// Long-running implementations should check `cancel` at their iteration
    /// boundaries and return `UnitError::Cancelled` once it fires.
    ///
    /// # Errors
    /// Returns a `UnitError` if the computation fails or is cancelled.
    async fn infer(
        &mut self,
        task: &InferenceTask,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> UnitResult<UnitOutput>;
}

/// Creates backends for newly spawned execution units.
pub trait BackendFactory: Send + Sync {
    /// Creates a fresh backend for the given model type.
    ///
    /// # Errors
    /// Returns a `UnitError` if no backend can serve the model type.
    fn create(&self, model_type: ModelType) -> UnitResult<Box<dyn InferenceBackend>>;
}
