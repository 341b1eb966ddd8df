//! Context and regeneration request/response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{AssembledContext, ContextPayload, Tier};
use crate::regenerate::RegenerationRequest;

/// Request to assemble a context without generating.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextRequest {
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextResponse {
    pub cache_hit: bool,
    /// `true` when candidates were dropped to respect the budget.
    pub degraded: bool,
    pub context: ContextPayload,
}

impl From<AssembledContext> for ContextResponse {
    fn from(assembled: AssembledContext) -> Self {
        ContextResponse {
            cache_hit: assembled.cache_hit,
            degraded: assembled.payload.is_degraded(),
            context: (*assembled.payload).clone(),
        }
    }
}

/// Request to regenerate a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegenerateRequest {
    /// Context tier. When omitted, the tier classifier decides.
    pub tier: Option<Tier>,
    /// Free-form instruction passed to the generator.
    pub instruction: Option<String>,
    /// Overrides the configured generation timeout.
    pub timeout_ms: Option<u64>,
}

impl From<RegenerateRequest> for RegenerationRequest {
    fn from(req: RegenerateRequest) -> Self {
        RegenerationRequest {
            tier: req.tier,
            instruction: req.instruction,
            timeout: req.timeout_ms.map(Duration::from_millis),
        }
    }
}
