//! Configuration types for the chat pipeline.
//!
//! Settings load from TOML (every section optional, see
//! [`ParleyConfig::default_config_path`]); secrets are overlaid from the
//! environment with [`ParleyConfig::apply_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_normalize::NormalizationOptions;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::pipeline::retry::RetryPolicy;
use crate::telemetry::cost::CostRates;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Input size limits.
    pub limits: LimitsConfig,
    /// Similarity search and rerank settings.
    pub retrieval: RetrievalConfig,
    /// Embedding, generation and transcription.
    pub openai: OpenAiSettings,
    /// Supabase vector search and metrics table.
    pub vector_store: VectorStoreConfig,
    /// Optional reranking service.
    pub rerank: RerankConfig,
    /// Speech synthesis.
    pub synthesis: SynthesisConfig,
    /// Where request metrics are persisted.
    pub telemetry: TelemetryConfig,
    /// Speech text preparation.
    pub normalization: NormalizationConfig,
    /// Deadlines and retries for remote calls.
    pub retry: RetryConfig,
    /// Unit prices for the cost estimate.
    pub cost: CostRates,
    /// Optional embedding cache.
    pub cache: CacheConfig,
    /// Assistant persona.
    pub persona: PersonaConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:3000`. Port 0 picks a free port.
    pub bind_addr: String,
    /// Frames buffered between the generation task and the response body.
    pub channel_capacity: usize,
    /// Largest accepted audio upload in bytes.
    pub max_audio_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_owned(),
            channel_capacity: 64,
            max_audio_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted message, in characters.
    pub max_message_chars: usize,
    /// Most recent history turns kept.
    pub max_history_turns: usize,
    /// Page context content is cut to this many characters.
    pub max_page_context_chars: usize,
    /// Budget for the document section of the system prompt, in characters.
    pub max_context_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4000,
            max_history_turns: 6,
            max_page_context_chars: 3000,
            max_context_chars: 12_000,
        }
    }
}

/// Similarity search parameters per path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub text_threshold: f32,
    pub text_match_count: usize,
    /// The voice path searches wider and relies on reranking.
    pub voice_threshold: f32,
    pub voice_match_count: usize,
    /// Documents kept after reranking.
    pub rerank_top_n: usize,
    /// Characters of content sent to the client per source.
    pub source_preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            text_threshold: 0.5,
            text_match_count: 5,
            voice_threshold: 0.2,
            voice_match_count: 20,
            rerank_top_n: 5,
            source_preview_chars: 200,
        }
    }
}

/// OpenAI endpoints and sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    /// Usually supplied through `OPENAI_API_KEY`.
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub transcription_model: String,
    /// Language hint for transcription.
    pub transcription_language: String,
    pub text_temperature: f32,
    pub text_max_tokens: u32,
    pub voice_temperature: f32,
    pub voice_max_tokens: u32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com".to_owned(),
            embedding_model: "text-embedding-3-small".to_owned(),
            chat_model: "gpt-4o-mini".to_owned(),
            transcription_model: "whisper-1".to_owned(),
            transcription_language: "ko".to_owned(),
            text_temperature: 0.7,
            text_max_tokens: 1000,
            voice_temperature: 0.5,
            voice_max_tokens: 500,
        }
    }
}

/// Supabase project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Project URL, usually from `SUPABASE_URL`.
    pub url: String,
    /// Service role key, usually from `SUPABASE_SERVICE_ROLE_KEY`.
    pub service_key: String,
    /// Name of the similarity search function.
    pub match_function: String,
    /// Table that request metrics are written to.
    pub metrics_table: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            match_function: "match_documents".to_owned(),
            metrics_table: "voice_metrics".to_owned(),
        }
    }
}

/// Reranking service. Disabled while `api_key` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.cohere.com".to_owned(),
            model: "rerank-english-v3.0".to_owned(),
        }
    }
}

impl RerankConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Speech synthesis voice and settings. Disabled while `api_key` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub voice_id: Option<String>,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.elevenlabs.io".to_owned(),
            voice_id: None,
            model_id: "eleven_multilingual_v2".to_owned(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.5,
            use_speaker_boost: true,
        }
    }
}

impl SynthesisConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Which store receives finalized request metrics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryBackend {
    /// Discard metrics.
    None,
    /// Insert into the Supabase metrics table.
    #[default]
    Supabase,
    /// Local SQLite file.
    Sqlite,
}

/// Telemetry persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub backend: TelemetryBackend,
    /// Database file for the SQLite backend.
    pub sqlite_path: PathBuf,
    /// Rows returned by the metrics endpoint when no limit is given.
    pub default_query_limit: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            backend: TelemetryBackend::default(),
            sqlite_path: PathBuf::from("parley-metrics.db"),
            default_query_limit: 100,
        }
    }
}

/// Speech normalization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Fixed seed for filler selection. Unset draws from OS entropy.
    pub filler_seed: Option<u64>,
    pub options: NormalizationOptions,
}

/// Remote call deadlines and retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Deadline for a single remote call.
    pub request_timeout_secs: u64,
    /// Backoff for idempotent reads.
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            policy: RetryPolicy::default(),
        }
    }
}

impl RetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Embedding cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 1000,
            ttl_secs: 3600,
        }
    }
}

/// Who the assistant speaks as.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Name of the site owner the assistant represents.
    pub name: String,
    /// Markdown file with decision principles quoted in the voice prompt.
    pub opinions_path: Option<PathBuf>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "William Jung".to_owned(),
            opinions_path: None,
        }
    }
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/parley/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("parley").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("parley")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/parley-config/config.toml")
        }
    }

    /// Overlay secrets and endpoints from environment variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`. Empty values are
    /// ignored so a blank variable never clears a configured key.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = get("SUPABASE_URL").or_else(|| get("NEXT_PUBLIC_SUPABASE_URL")) {
            self.vector_store.url = v;
        }
        if let Some(v) = get("SUPABASE_SERVICE_ROLE_KEY") {
            self.vector_store.service_key = v;
        }
        if let Some(v) = get("COHERE_API_KEY") {
            self.rerank.api_key = Some(v);
        }
        if let Some(v) = get("ELEVENLABS_API_KEY") {
            self.synthesis.api_key = Some(v);
        }
        if let Some(v) = get("ELEVENLABS_VOICE_ID") {
            self.synthesis.voice_id = Some(v);
        }
        if let Some(v) = get("PARLEY_BIND_ADDR") {
            self.server.bind_addr = v;
        }
    }

    /// Check that required settings are present and values are in range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PipelineError::Config(msg.to_owned()));

        if self.openai.api_key.is_empty() {
            return fail("openai.api_key is required (set OPENAI_API_KEY)");
        }
        if self.vector_store.url.is_empty() || self.vector_store.service_key.is_empty() {
            return fail(
                "vector_store.url and vector_store.service_key are required \
                 (set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY)",
            );
        }
        for (name, value) in [
            ("retrieval.text_threshold", self.retrieval.text_threshold),
            ("retrieval.voice_threshold", self.retrieval.voice_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.retrieval.text_match_count == 0
            || self.retrieval.voice_match_count == 0
            || self.retrieval.rerank_top_n == 0
        {
            return fail("retrieval match counts and rerank_top_n must be positive");
        }
        if self.limits.max_message_chars == 0 {
            return fail("limits.max_message_chars must be positive");
        }
        if self.server.channel_capacity == 0 {
            return fail("server.channel_capacity must be positive");
        }
        if self.retry.request_timeout_secs == 0 {
            return fail("retry.request_timeout_secs must be positive");
        }
        if self.synthesis.enabled() && self.synthesis.voice_id.as_deref().is_none_or(str::is_empty)
        {
            return fail("synthesis.voice_id is required when synthesis is enabled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn configured() -> ParleyConfig {
        let mut config = ParleyConfig::default();
        config.apply_env(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]));
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ParleyConfig::default();
        assert_eq!(config.limits.max_message_chars, 4000);
        assert_eq!(config.limits.max_history_turns, 6);
        assert_eq!(config.retrieval.text_threshold, 0.5);
        assert_eq!(config.retrieval.text_match_count, 5);
        assert_eq!(config.retrieval.voice_threshold, 0.2);
        assert_eq!(config.retrieval.voice_match_count, 20);
        assert_eq!(config.retrieval.rerank_top_n, 5);
        assert_eq!(config.openai.chat_model, "gpt-4o-mini");
        assert_eq!(config.retry.policy.max_retries, 2);
        assert!(!config.rerank.enabled());
        assert!(!config.synthesis.enabled());
    }

    #[test]
    fn apply_env_sets_secrets() {
        let mut config = ParleyConfig::default();
        config.apply_env(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("NEXT_PUBLIC_SUPABASE_URL", "https://fallback.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
            ("COHERE_API_KEY", "co-key"),
            ("ELEVENLABS_API_KEY", "el-key"),
            ("ELEVENLABS_VOICE_ID", "voice-1"),
        ]));
        assert_eq!(config.openai.api_key, "sk-test");
        assert_eq!(config.vector_store.url, "https://fallback.supabase.co");
        assert!(config.rerank.enabled());
        assert!(config.synthesis.enabled());
        assert_eq!(config.synthesis.voice_id.as_deref(), Some("voice-1"));
    }

    #[test]
    fn supabase_url_takes_precedence_and_blank_is_ignored() {
        let mut config = ParleyConfig::default();
        config.openai.api_key = "from-file".into();
        config.apply_env(env(&[
            ("OPENAI_API_KEY", "  "),
            ("SUPABASE_URL", "https://primary.supabase.co"),
            ("NEXT_PUBLIC_SUPABASE_URL", "https://fallback.supabase.co"),
        ]));
        assert_eq!(config.openai.api_key, "from-file");
        assert_eq!(config.vector_store.url, "https://primary.supabase.co");
    }

    #[test]
    fn validate_requires_credentials() {
        assert!(ParleyConfig::default().validate().is_err());
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = configured();
        config.retrieval.voice_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("voice_threshold"));
    }

    #[test]
    fn validate_requires_voice_when_synthesis_enabled() {
        let mut config = configured();
        config.synthesis.api_key = Some("el-key".into());
        assert!(config.validate().is_err());
        config.synthesis.voice_id = Some("voice-1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ParleyConfig = toml::from_str(
            r#"
            [retrieval]
            text_threshold = 0.6

            [normalization]
            filler_seed = 7

            [normalization.options]
            add_fillers = false
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.text_threshold, 0.6);
        assert_eq!(config.retrieval.text_match_count, 5);
        assert_eq!(config.normalization.filler_seed, Some(7));
        assert!(!config.normalization.options.add_fillers);
        assert!(config.normalization.options.remove_citations);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = configured();
        config.telemetry.backend = TelemetryBackend::Sqlite;
        config.save_to_file(&path).unwrap();

        let loaded = ParleyConfig::from_file(&path).unwrap();
        assert_eq!(loaded.telemetry.backend, TelemetryBackend::Sqlite);
        assert_eq!(loaded.openai.api_key, "sk-test");
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(ParleyConfig::from_file(&path).is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = ParleyConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("parley"));
    }
}
