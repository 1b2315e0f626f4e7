//! Bandwidth and accessibility policy inputs

use serde::{Deserialize, Serialize};

/// Effective connection type as reported by the network information API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveConnectionType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl EffectiveConnectionType {
    /// Parse the platform's string form
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Some(Self::Slow2g),
            "2g" => Some(Self::TwoG),
            "3g" => Some(Self::ThreeG),
            "4g" => Some(Self::FourG),
            _ => None,
        }
    }

    /// Too slow to spend bytes speculatively
    pub fn is_very_slow(&self) -> bool {
        matches!(self, Self::Slow2g | Self::TwoG)
    }
}

/// Snapshot of the client's network conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInformation {
    /// User asked for reduced data usage
    pub save_data: bool,
    /// Reported effective connection type, if any
    pub effective_type: Option<EffectiveConnectionType>,
}

impl NetworkInformation {
    /// Whether speculative work should be dropped outright
    pub fn is_constrained(&self) -> bool {
        self.save_data || self.effective_type.is_some_and(|t| t.is_very_slow())
    }
}

/// Live environment the manager makes policy decisions against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    /// Client reports connectivity
    pub online: bool,
    /// User prefers reduced motion; gates the hover-dwell heuristic only
    pub reduced_motion: bool,
    /// Current network conditions
    pub network: NetworkInformation,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            online: true,
            reduced_motion: false,
            network: NetworkInformation::default(),
        }
    }
}
