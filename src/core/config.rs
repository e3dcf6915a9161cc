// Runtime configuration for the routing pipeline.
//
// Values only; the composition root decides where they come from. `from_env`
// is the usual source, with every variable optional.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Model identifier passed to the inference provider.
    pub inference_model: String,
    /// Timeout applied to each inference call and each service call.
    pub call_timeout: Duration,
    /// Maximum attempts per call, including the first one.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
    /// Turns kept per session before the oldest is evicted.
    pub max_turns: usize,
    /// How many recent turns are shown to the model.
    pub history_turns: usize,
    /// Rough token budget for those turns.
    pub history_token_budget: usize,
    /// Intents below this confidence become clarification questions.
    pub confidence_threshold: f64,
    /// Idle sessions older than this are dropped. `None` keeps them forever.
    pub session_ttl: Option<Duration>,
    /// SQLite file for session history. `None` keeps sessions in memory only.
    pub session_db: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inference_model: "deepseek/deepseek-chat-v3.1:free".to_string(),
            call_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_secs(10),
            max_turns: 50,
            history_turns: 6,
            history_token_budget: 2000,
            confidence_threshold: 0.6,
            session_ttl: None,
            session_db: None,
        }
    }
}

impl RouterConfig {
    /// Reads `ROUTER_*` variables, falling back to defaults for anything
    /// missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            inference_model: std::env::var("ROUTER_INFERENCE_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.inference_model),
            call_timeout: env_parse::<u64>("ROUTER_CALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            max_attempts: env_parse::<u32>("ROUTER_MAX_ATTEMPTS")
                .filter(|v| *v >= 1)
                .unwrap_or(defaults.max_attempts),
            backoff_base: env_parse::<u64>("ROUTER_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_multiplier: env_parse::<f64>("ROUTER_BACKOFF_MULTIPLIER")
                .filter(|v| *v >= 1.0)
                .unwrap_or(defaults.backoff_multiplier),
            backoff_max: env_parse::<u64>("ROUTER_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_max),
            max_turns: env_parse::<usize>("ROUTER_MAX_TURNS")
                .filter(|v| *v >= 1)
                .unwrap_or(defaults.max_turns),
            history_turns: env_parse::<usize>("ROUTER_HISTORY_TURNS")
                .unwrap_or(defaults.history_turns),
            history_token_budget: env_parse::<usize>("ROUTER_HISTORY_TOKEN_BUDGET")
                .unwrap_or(defaults.history_token_budget),
            confidence_threshold: env_parse::<f64>("ROUTER_CONFIDENCE_THRESHOLD")
                .filter(|v| (0.0..=1.0).contains(v))
                .unwrap_or(defaults.confidence_threshold),
            session_ttl: env_parse::<u64>("ROUTER_SESSION_TTL_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs),
            session_db: std::env::var("ROUTER_SESSION_DB")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}
