//! Configuration for preprocessing and retrieval runs.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across the concurrent workers, log it at run
//! start, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::SiftError;
use crate::llm::LanguageModel;
use crate::progress::BatchProgress;
use std::fmt;
use std::sync::Arc;

/// Configuration shared by the preprocessing pipeline and the retrieval
/// engine.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docsift::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(20)
///     .max_retries(2)
///     .model_name("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum rendered page dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap on rasterisation: an A0 poster page rendered without a
    /// bound could allocate hundreds of megapixels. The cap scales the other
    /// dimension proportionally and sits in the sweet spot for vision-model
    /// input sizes.
    pub max_rendered_pixels: u32,

    /// Maximum simultaneous in-flight external calls. Default: 100.
    ///
    /// Applies to both enrichment (vision calls per page) and retrieval
    /// (text calls per query). This is the only concurrency control in the
    /// system; everything else is independent per-unit work.
    pub concurrency: usize,

    /// Model identifier sent to the API. Default: "gpt-4o".
    pub model_name: String,

    /// Pre-constructed language model. Takes precedence over `model_name`;
    /// the injection point for deterministic stubs in tests.
    pub model: Option<Arc<dyn LanguageModel>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Retrieval wants the most deterministic pick available, and captions
    /// gain nothing from creativity, so both call sites share the floor
    /// value.
    pub temperature: f32,

    /// Max tokens for one vision caption. Default: 4096.
    pub enrich_max_tokens: usize,

    /// Max tokens for one retrieval answer. Default: 1000.
    ///
    /// The answer is a single JSON object naming one document id; 1000
    /// leaves headroom for models that pad their JSON with whitespace.
    pub retrieve_max_tokens: usize,

    /// Maximum retry attempts after a failed external call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms, 1 s, 2 s. Backoff keeps N
    /// concurrent workers from re-hammering a recovering API endpoint in
    /// lockstep.
    pub retry_backoff_ms: u64,

    /// Minimum non-whitespace characters for a page's raw text to count as
    /// sufficient. Default: 50.
    ///
    /// Pages below this threshold that also carry image content get a
    /// vision-generated description; pages above it are left alone.
    pub min_text_chars: usize,

    /// Largest tolerated hole in a document's page-number sequence. Default: 1.
    ///
    /// A single lost page (extraction glitch) keeps the document; a larger
    /// gap indicates upstream extraction loss and rejects it.
    pub max_page_gap: u32,

    /// Per-call timeout in seconds for external API requests. Default: 60.
    pub api_timeout_secs: u64,

    /// Override for the enrichment system prompt. If None, uses built-in.
    pub enrich_prompt: Option<String>,

    /// Progress observer for batch stages. Default: none.
    pub progress: Option<Arc<dyn BatchProgress>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            concurrency: 100,
            model_name: "gpt-4o".to_string(),
            model: None,
            temperature: 0.0,
            enrich_max_tokens: 4096,
            retrieve_max_tokens: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            min_text_chars: 50,
            max_page_gap: 1,
            api_timeout_secs: 60,
            enrich_prompt: None,
            progress: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model_name", &self.model_name)
            .field("model", &self.model.as_ref().map(|_| "<dyn LanguageModel>"))
            .field("temperature", &self.temperature)
            .field("enrich_max_tokens", &self.enrich_max_tokens)
            .field("retrieve_max_tokens", &self.retrieve_max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("min_text_chars", &self.min_text_chars)
            .field("max_page_gap", &self.max_page_gap)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = name.into();
        self
    }

    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.config.model = Some(model);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn enrich_max_tokens(mut self, n: usize) -> Self {
        self.config.enrich_max_tokens = n;
        self
    }

    pub fn retrieve_max_tokens(mut self, n: usize) -> Self {
        self.config.retrieve_max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn max_page_gap(mut self, n: u32) -> Self {
        self.config.max_page_gap = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn enrich_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.enrich_prompt = Some(prompt.into());
        self
    }

    pub fn progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.config.progress = Some(progress);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, SiftError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(SiftError::InvalidConfig("concurrency must be >= 1".into()));
        }
        if c.model_name.trim().is_empty() {
            return Err(SiftError::InvalidConfig("model name must not be empty".into()));
        }
        if c.retrieve_max_tokens == 0 || c.enrich_max_tokens == 0 {
            return Err(SiftError::InvalidConfig(
                "token limits must be >= 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.concurrency, 100);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_backoff_ms, 500);
        assert_eq!(c.min_text_chars, 50);
        assert_eq!(c.max_page_gap, 1);
        assert_eq!(c.model_name, "gpt-4o");
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = PipelineConfig::builder()
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        // concurrency(0) is clamped up by the setter, not rejected
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn empty_model_name_rejected() {
        let err = PipelineConfig::builder().model_name("  ").build().unwrap_err();
        assert!(matches!(err, SiftError::InvalidConfig(_)));
    }
}
