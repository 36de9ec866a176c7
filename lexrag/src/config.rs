use serde::Deserialize;
use std::env;

/// Refusal shown when the retrieved material cannot support an answer.
pub const DEFAULT_REFUSAL_TEMPLATE: &str =
    "Jag kan tyvärr inte besvara frågan utifrån de källor som finns tillgängliga. \
     Underlaget saknar tillräckligt stöd för ett korrekt juridiskt svar.";

/// Upper bound on critic-revise rounds, whatever the configuration asks for.
pub const MAX_CRITIC_ROUNDS: u32 = 2;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parse a comma-separated list, dropping empty entries.
fn parse_env_list(var: &str) -> Vec<String> {
    match env::var(var) {
        Ok(val) if !val.is_empty() => val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: Option<LlmConfig>,
    pub retrieval: RetrievalConfig,
    pub grading: GradingConfig,
    pub reranker: RerankerConfig,
    pub generation: GenerationConfig,
    pub decontextualize: DecontextConfig,
    pub guardrail: GuardrailConfig,
    pub few_shot_path: Option<String>,
}

/// LLM configuration for the OpenAI-compatible inference server
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub top_k: usize,
}

/// Corrective retrieval grading
#[derive(Debug, Clone, Deserialize)]
pub struct GradingConfig {
    pub enabled: bool,
    /// Minimum grade score for a document to count as relevant.
    pub threshold: f32,
    /// Number of grading calls in flight per request.
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub self_reflection: bool,
}

/// Cross-encoder reranking applied after grading
#[derive(Debug, Clone, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: String,
    pub cache_dir: String,
    pub batch_size: usize,
    pub score_threshold: f32,
    pub top_n: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub chat_temperature: f32,
    pub structured_output: bool,
    pub critic_revise: bool,
    pub critic_max_rounds: u32,
    /// Approximate token budget for the assembled source context.
    pub max_context_tokens: usize,
    pub max_history_turns: usize,
    pub refusal_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecontextConfig {
    pub timeout_ms: u64,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailConfig {
    pub max_query_chars: usize,
    /// Extra infrastructure names to redact from generated answers.
    pub leakage_markers: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    /// Violations inside the window that trigger a ban.
    pub threshold: usize,
    pub ban_secs: u64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            concurrency: 4,
            timeout_ms: 8000,
            self_reflection: false,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "bge-reranker-v2-m3".to_string(),
            cache_dir: ".fastembed_cache".to_string(),
            batch_size: 32,
            score_threshold: 0.1,
            top_n: 6,
            timeout_ms: 5000,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_tokens: 1024,
            temperature: 0.2,
            chat_temperature: 0.1,
            structured_output: true,
            critic_revise: false,
            critic_max_rounds: MAX_CRITIC_ROUNDS,
            max_context_tokens: 6000,
            max_history_turns: 6,
            refusal_template: DEFAULT_REFUSAL_TEMPLATE.to_string(),
        }
    }
}

impl Default for DecontextConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4000,
            cache_size: 512,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            threshold: 6,
            ban_secs: 900,
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_query_chars: 2000,
            leakage_markers: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: None,
            retrieval: RetrievalConfig {
                base_url: "http://localhost:8900".to_string(),
                timeout_secs: 15,
                top_k: 12,
            },
            grading: GradingConfig::default(),
            reranker: RerankerConfig::default(),
            generation: GenerationConfig::default(),
            decontextualize: DecontextConfig::default(),
            guardrail: GuardrailConfig::default(),
            few_shot_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let grading_defaults = GradingConfig::default();
        let reranker_defaults = RerankerConfig::default();
        let generation_defaults = GenerationConfig::default();
        let decontext_defaults = DecontextConfig::default();
        let rate_defaults = RateLimitConfig::default();

        Self {
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 60),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 2),
            }),
            retrieval: RetrievalConfig {
                base_url: env::var("RETRIEVAL_URL")
                    .unwrap_or_else(|_| "http://localhost:8900".to_string()),
                timeout_secs: parse_env_or("RETRIEVAL_TIMEOUT", 15),
                top_k: parse_env_or("RETRIEVAL_TOP_K", 12),
            },
            grading: GradingConfig {
                enabled: parse_env_or("CRAG_ENABLED", grading_defaults.enabled),
                threshold: parse_env_or("CRAG_THRESHOLD", grading_defaults.threshold),
                concurrency: parse_env_or("CRAG_CONCURRENCY", grading_defaults.concurrency).max(1),
                timeout_ms: parse_env_or("CRAG_TIMEOUT_MS", grading_defaults.timeout_ms),
                self_reflection: parse_env_or(
                    "SELF_REFLECTION_ENABLED",
                    grading_defaults.self_reflection,
                ),
            },
            reranker: RerankerConfig {
                enabled: parse_env_or("RERANK_ENABLED", reranker_defaults.enabled),
                model: env::var("RERANK_MODEL").unwrap_or(reranker_defaults.model),
                cache_dir: env::var("RERANK_CACHE_DIR").unwrap_or(reranker_defaults.cache_dir),
                batch_size: parse_env_or("RERANK_BATCH_SIZE", reranker_defaults.batch_size),
                score_threshold: parse_env_or(
                    "RERANK_SCORE_THRESHOLD",
                    reranker_defaults.score_threshold,
                ),
                top_n: parse_env_or("RERANK_TOP_N", reranker_defaults.top_n),
                timeout_ms: parse_env_or("RERANK_TIMEOUT_MS", reranker_defaults.timeout_ms),
            },
            generation: GenerationConfig {
                timeout_secs: parse_env_or("GENERATION_TIMEOUT", generation_defaults.timeout_secs),
                max_tokens: parse_env_or("GENERATION_MAX_TOKENS", generation_defaults.max_tokens),
                temperature: parse_env_or(
                    "GENERATION_TEMPERATURE",
                    generation_defaults.temperature,
                ),
                chat_temperature: parse_env_or(
                    "CHAT_TEMPERATURE",
                    generation_defaults.chat_temperature,
                ),
                structured_output: parse_env_or(
                    "STRUCTURED_OUTPUT_ENABLED",
                    generation_defaults.structured_output,
                ),
                critic_revise: parse_env_or(
                    "CRITIC_REVISE_ENABLED",
                    generation_defaults.critic_revise,
                ),
                critic_max_rounds: parse_env_or(
                    "CRITIC_MAX_ROUNDS",
                    generation_defaults.critic_max_rounds,
                ),
                max_context_tokens: parse_env_or(
                    "MAX_CONTEXT_TOKENS",
                    generation_defaults.max_context_tokens,
                ),
                max_history_turns: parse_env_or(
                    "MAX_HISTORY_TURNS",
                    generation_defaults.max_history_turns,
                ),
                refusal_template: env::var("REFUSAL_TEMPLATE")
                    .ok()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or(generation_defaults.refusal_template),
            },
            decontextualize: DecontextConfig {
                timeout_ms: parse_env_or("DECONTEXT_TIMEOUT_MS", decontext_defaults.timeout_ms),
                cache_size: parse_env_or("DECONTEXT_CACHE_SIZE", decontext_defaults.cache_size),
            },
            guardrail: GuardrailConfig {
                max_query_chars: parse_env_or("MAX_QUERY_CHARS", 2000),
                leakage_markers: parse_env_list("LEAKAGE_MARKERS"),
                rate_limit: RateLimitConfig {
                    window_secs: parse_env_or("RATE_LIMIT_WINDOW_SECS", rate_defaults.window_secs),
                    threshold: parse_env_or("RATE_LIMIT_THRESHOLD", rate_defaults.threshold)
                        .max(1),
                    ban_secs: parse_env_or("RATE_LIMIT_BAN_SECS", rate_defaults.ban_secs),
                },
            },
            few_shot_path: parse_env_opt("FEW_SHOT_PATH"),
        }
    }

    /// Critic-revise rounds actually run, after applying the hard cap.
    pub fn effective_critic_rounds(&self) -> u32 {
        self.generation.critic_max_rounds.min(MAX_CRITIC_ROUNDS)
    }
}

/// Known LLM providers that use OpenAI-compatible APIs
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio", "vllm"];

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to treating the whole string as a local model
    ("local", model)
}
