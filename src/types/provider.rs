//! Upstream provider identifiers

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HeimdallError;

/// An upstream AI provider the gateway can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    /// Every known provider, in display order.
    pub const ALL: [Provider; 2] = [Provider::Claude, Provider::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = HeimdallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "openai" => Ok(Self::OpenAi),
            other => Err(HeimdallError::Validation(format!("unknown provider: {other}"))),
        }
    }
}
