//! Provider adapters
//!
//! One adapter per external WhatsApp provider behind a shared trait, plus
//! the canonical status table and the registry that resolves an adapter for
//! a connection exactly once.

pub mod evolution;
pub mod registry;
pub mod status;
pub mod trait_;
pub mod zapi;

pub use evolution::EvolutionAdapter;
pub use registry::ProviderRegistry;
pub use status::{ConnectionStatus, normalize};
pub use trait_::{
    CreateInstanceRequest, CreateInstanceResponse, HistoryRecovery, ProviderAdapter, ProviderError,
    StatusProbe,
};
pub use zapi::ZapiAdapter;

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// The two supported providers. Fixed at connection creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Evolution,
    Zapi,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Evolution => "evolution",
            ProviderKind::Zapi => "zapi",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "evolution" => Some(ProviderKind::Evolution),
            "zapi" => Some(ProviderKind::Zapi),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
