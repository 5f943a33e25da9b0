//! Canonical connection status registry.
//!
//! Both providers speak their own status vocabulary; everything entering the
//! engine goes through [`normalize`] exactly once, at the adapter boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The six-value canonical status used everywhere inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Creating,
    Qr,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    /// Canonical string representation, matching the persisted column.
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Creating => "creating",
            ConnectionStatus::Qr => "qr",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }

    /// Parse a persisted canonical value back into the enum.
    pub fn parse(value: &str) -> Option<Self> {
        ALL_STATUSES.iter().copied().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete registry of canonical statuses.
pub const ALL_STATUSES: &[ConnectionStatus] = &[
    ConnectionStatus::Creating,
    ConnectionStatus::Qr,
    ConnectionStatus::Connecting,
    ConnectionStatus::Connected,
    ConnectionStatus::Disconnected,
    ConnectionStatus::Error,
];

/// Map a raw provider status string into the canonical enum.
///
/// The table is fixed; anything it does not recognize maps to
/// `Disconnected`. The fail-safe direction matters: an unknown value must
/// never read as `Connected`.
pub fn normalize(raw: &str) -> ConnectionStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "creating" | "created" | "initializing" => ConnectionStatus::Creating,
        "qr" | "qrcode" | "qr_code" | "awaiting_scan" => ConnectionStatus::Qr,
        "connecting" | "pairing" | "starting" | "loading" => ConnectionStatus::Connecting,
        "open" | "connected" | "online" => ConnectionStatus::Connected,
        "close" | "closed" | "disconnected" | "offline" | "logout" | "logged_out" => {
            ConnectionStatus::Disconnected
        }
        "error" | "refused" | "banned" | "failed" => ConnectionStatus::Error,
        _ => ConnectionStatus::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_has_unique_entries() {
        let mut seen = HashSet::new();
        for status in ALL_STATUSES {
            assert!(seen.insert(status.as_str()), "duplicate status {}", status);
        }
    }

    #[test]
    fn parse_round_trips() {
        for status in ALL_STATUSES {
            let parsed = ConnectionStatus::parse(status.as_str()).expect("status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn normalize_always_lands_in_registry() {
        for raw in [
            "open",
            "close",
            "connecting",
            "qrcode",
            "CONNECTED",
            "DISCONNECTED",
            "PAIRING",
            "banned",
            "whatever-this-is",
            "",
        ] {
            assert!(ALL_STATUSES.contains(&normalize(raw)));
        }
    }

    #[test]
    fn normalize_evolution_vocabulary() {
        assert_eq!(normalize("open"), ConnectionStatus::Connected);
        assert_eq!(normalize("connecting"), ConnectionStatus::Connecting);
        assert_eq!(normalize("close"), ConnectionStatus::Disconnected);
        assert_eq!(normalize("refused"), ConnectionStatus::Error);
    }

    #[test]
    fn normalize_zapi_vocabulary() {
        assert_eq!(normalize("CONNECTED"), ConnectionStatus::Connected);
        assert_eq!(normalize("PAIRING"), ConnectionStatus::Connecting);
        assert_eq!(normalize("DISCONNECTED"), ConnectionStatus::Disconnected);
    }

    #[test]
    fn unrecognized_input_fails_safe_to_disconnected() {
        assert_eq!(normalize("garbage"), ConnectionStatus::Disconnected);
        assert_eq!(normalize(""), ConnectionStatus::Disconnected);
        // never fail-open
        assert_ne!(normalize("conected"), ConnectionStatus::Connected);
    }
}
