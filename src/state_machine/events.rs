use serde::{Deserialize, Serialize};

/// Result of running a phase handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum HandlerOutcome {
    /// Local work for the phase is done; signal completion
    Continue,
    /// Run-wide cooperative cancellation observed; treated as completion
    Abort(String),
    /// Nothing more to do; skip completion reporting and stop the loop
    Terminal,
}

impl HandlerOutcome {
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort(reason.into())
    }

    /// Get a string representation of the outcome for logging
    pub fn outcome_type(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Abort(_) => "abort",
            Self::Terminal => "terminal",
        }
    }

    /// Whether the machine should signal completion for this phase
    pub fn signals_completion(&self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_terminal_skips_completion() {
        assert!(HandlerOutcome::Continue.signals_completion());
        assert!(HandlerOutcome::abort("user cancelled").signals_completion());
        assert!(!HandlerOutcome::Terminal.signals_completion());
        assert_eq!(HandlerOutcome::abort("x").outcome_type(), "abort");
    }
}
