//! Stage definitions embedded in pipeline configurations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of backend service a stage is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Text generation (LLM completion).
    TextGeneration,
    /// Image generation.
    ImageGeneration,
    /// Video generation.
    VideoGeneration,
    /// Embedding computation.
    Embeddings,
    /// Audio generation (speech synthesis, music).
    AudioGeneration,
    /// Audio transcription.
    AudioTranscription,
    /// Language understanding (classification, extraction).
    LanguageUnderstanding,
    /// Web or knowledge search.
    Search,
}

impl ServiceType {
    /// Returns the wire name of this service type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::ImageGeneration => "image_generation",
            Self::VideoGeneration => "video_generation",
            Self::Embeddings => "embeddings",
            Self::AudioGeneration => "audio_generation",
            Self::AudioTranscription => "audio_transcription",
            Self::LanguageUnderstanding => "language_understanding",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fallback strategy kinds for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackKind {
    /// Fall over to alternative services of the same type.
    #[default]
    AlternativeService,
    /// Retry with a simplified prompt.
    SimplifiedPrompt,
    /// Serve a cached result.
    Cache,
    /// Fall back to a local model.
    LocalModel,
    /// No fallback.
    None,
}

/// Declarative input wiring for a stage.
///
/// When absent from a stage, the stage receives the pipeline's original
/// input. When `from` is present, the stage receives the referenced stage's
/// output; if that output is missing, `default` is used instead when
/// declared, otherwise input resolution fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInputSpec {
    /// Declared content type of the input (e.g. "text", "image").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The upstream stage id whose output feeds this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Default value used when the referenced output is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl StageInputSpec {
    /// Creates an input spec fed by an upstream stage's output.
    #[must_use]
    pub fn from_stage(content_type: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            from: Some(from.into()),
            default: None,
        }
    }

    /// Creates an input spec for the pipeline's original input.
    #[must_use]
    pub fn original(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            from: None,
            default: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declarative output description for a stage. Not enforced at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutputSpec {
    /// Declared content type of the output.
    #[serde(rename = "type")]
    pub content_type: String,
}

impl StageOutputSpec {
    /// Creates a new output spec.
    #[must_use]
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }
}

/// Fallback behavior for a stage when service attempts fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackStrategy {
    /// The fallback kind.
    #[serde(rename = "type")]
    pub kind: FallbackKind,
    /// Acceptable alternative service names (for `alternative-service`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    /// Quality threshold below which fallback triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Attempt budget for this stage, overriding the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl FallbackStrategy {
    /// Creates an alternative-service strategy.
    #[must_use]
    pub fn alternative_service(services: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: FallbackKind::AlternativeService,
            services: services.into_iter().map(Into::into).collect(),
            threshold: None,
            max_attempts: None,
        }
    }

    /// Creates a no-fallback strategy.
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: FallbackKind::None,
            services: Vec::new(),
            threshold: None,
            max_attempts: None,
        }
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the quality threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Inter-attempt delay configuration for a stage.
///
/// Delays apply between fallback attempts; the attempt budget itself comes
/// from the stage's fallback strategy or the pipeline's global default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRetryConfig {
    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to apply full jitter to computed delays.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for StageRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

impl StageRetryConfig {
    /// Creates a new retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Enables full jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

/// One stage of a pipeline configuration.
///
/// Stages are value types embedded in their configuration; they are not
/// persisted independently. Declaration order defines execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    /// Stage id, unique within its pipeline.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Description of what the stage produces.
    #[serde(default)]
    pub description: String,
    /// The service type this stage is routed to.
    pub service_type: ServiceType,
    /// Whether a failure of this stage aborts the whole run.
    pub required: bool,
    /// Input wiring. Absent means the pipeline's original input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<StageInputSpec>,
    /// Declarative output description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageOutputSpec>,
    /// Fallback behavior when attempts fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<FallbackStrategy>,
    /// Wall-clock cutoff for a single service invocation, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Inter-attempt delay configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<StageRetryConfig>,
}

impl PipelineStage {
    /// Creates a new required stage.
    #[must_use]
    pub fn new(id: impl Into<String>, service_type: ServiceType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            service_type,
            required: true,
            input: None,
            output: None,
            fallback_strategy: None,
            timeout_ms: None,
            retry_config: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the stage as optional: a failure is recorded and skipped over.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets the input wiring.
    #[must_use]
    pub fn with_input(mut self, input: StageInputSpec) -> Self {
        self.input = Some(input);
        self
    }

    /// Sets the output description.
    #[must_use]
    pub fn with_output(mut self, output: StageOutputSpec) -> Self {
        self.output = Some(output);
        self
    }

    /// Sets the fallback strategy.
    #[must_use]
    pub fn with_fallback(mut self, strategy: FallbackStrategy) -> Self {
        self.fallback_strategy = Some(strategy);
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: StageRetryConfig) -> Self {
        self.retry_config = Some(retry);
        self
    }
}
