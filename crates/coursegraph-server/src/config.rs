//! Server and orchestrator configuration.
//!
//! [`ServerConfig`] is read once at start-up from `COURSEGRAPH_*` environment
//! variables. [`OrchestratorConfig`] holds the knobs the per-course services
//! need and has a `Default` for library and test use.

use std::str::FromStr;
use std::time::Duration;

use crate::context::Tier;
use crate::llm_provider::LlmConfig;

/// Malformed configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Token ceilings per context tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBudgets {
    pub atomic: usize,
    pub local: usize,
    pub structural: usize,
    pub global: usize,
}

impl TierBudgets {
    pub fn for_tier(&self, tier: Tier) -> usize {
        match tier {
            Tier::Atomic => self.atomic,
            Tier::Local => self.local,
            Tier::Structural => self.structural,
            Tier::Global => self.global,
        }
    }
}

impl Default for TierBudgets {
    fn default() -> Self {
        TierBudgets {
            atomic: 2_000,
            local: 4_000,
            structural: 8_000,
            global: 16_000,
        }
    }
}

/// Settings shared by every course orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a regeneration lease lives before the sweep reclaims it.
    pub lease_ttl: Duration,
    /// How often expired leases are swept.
    pub lease_sweep_interval: Duration,
    /// Default bound on one generator call.
    pub generation_timeout: Duration,
    /// Propagation worker tasks per course.
    pub propagation_workers: usize,
    pub budgets: TierBudgets,
    /// How many nodes the retrieval collaborator may add to a Global context.
    pub global_sample: usize,
    /// Capacity of the context payload cache per course.
    pub context_cache_capacity: usize,
    /// Capacity of the state event channel per course.
    pub event_capacity: usize,
    /// Period of the background persistence flush.
    pub flush_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            lease_ttl: Duration::from_secs(300),
            lease_sweep_interval: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            propagation_workers: 4,
            budgets: TierBudgets::default(),
            global_sample: 8,
            context_cache_capacity: 128,
            event_capacity: 1024,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Complete configuration of the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: String,
    pub port: u16,
    pub orchestrator: OrchestratorConfig,
    /// Chat provider settings, present when a model is configured.
    pub llm: Option<LlmConfig>,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the raw value
    /// of a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = OrchestratorConfig::default();
        let budget_defaults = TierBudgets::default();

        let orchestrator = OrchestratorConfig {
            lease_ttl: Duration::from_secs(parse_or(
                &lookup,
                "COURSEGRAPH_LEASE_TTL_SECS",
                defaults.lease_ttl.as_secs(),
            )?),
            lease_sweep_interval: defaults.lease_sweep_interval,
            generation_timeout: Duration::from_secs(parse_or(
                &lookup,
                "COURSEGRAPH_GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?),
            propagation_workers: parse_or(
                &lookup,
                "COURSEGRAPH_PROPAGATION_WORKERS",
                defaults.propagation_workers,
            )?
            .max(1),
            budgets: TierBudgets {
                atomic: parse_or(&lookup, "COURSEGRAPH_BUDGET_ATOMIC", budget_defaults.atomic)?,
                local: parse_or(&lookup, "COURSEGRAPH_BUDGET_LOCAL", budget_defaults.local)?,
                structural: parse_or(
                    &lookup,
                    "COURSEGRAPH_BUDGET_STRUCTURAL",
                    budget_defaults.structural,
                )?,
                global: parse_or(&lookup, "COURSEGRAPH_BUDGET_GLOBAL", budget_defaults.global)?,
            },
            global_sample: parse_or(&lookup, "COURSEGRAPH_GLOBAL_SAMPLE", defaults.global_sample)?,
            context_cache_capacity: parse_or(
                &lookup,
                "COURSEGRAPH_CONTEXT_CACHE",
                defaults.context_cache_capacity,
            )?,
            event_capacity: defaults.event_capacity,
            flush_interval: defaults.flush_interval,
        };

        let llm = lookup("COURSEGRAPH_LLM_MODEL").map(|model| LlmConfig {
            provider: lookup("COURSEGRAPH_LLM_PROVIDER")
                .unwrap_or_else(|| "openrouter".to_string()),
            model,
            api_base_url: lookup("COURSEGRAPH_LLM_BASE_URL"),
            api_key: lookup("COURSEGRAPH_LLM_API_KEY"),
            system_prompt: lookup("COURSEGRAPH_LLM_SYSTEM_PROMPT"),
        });

        Ok(ServerConfig {
            db_path: lookup("COURSEGRAPH_DB_PATH").unwrap_or_else(|| "coursegraph.db".to_string()),
            port: parse_or(&lookup, "COURSEGRAPH_PORT", 3000)?,
            orchestrator,
            llm,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
