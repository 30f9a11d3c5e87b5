//! Gate-state model.
//!
//! The persisted record holds a single string field under [`GATE_KEY`]:
//! `"1"` means new pipeline runs are allowed, anything else means denied.
//! A missing record or missing key is a distinct outcome ([`StoredGate::Absent`])
//! so that the fail-open default lives at the call sites that want it, not in
//! the store.

use std::fmt;

/// Well-known key in the decision record holding the gate value.
pub const GATE_KEY: &str = "allow";

const VALUE_ALLOWED: &str = "1";
const VALUE_DENIED: &str = "0";

/// The decision the reconciler computes and the webhook enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Allowed,
    Denied,
}

impl GateState {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            GateState::Allowed
        } else {
            GateState::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, GateState::Allowed)
    }

    /// The string persisted under [`GATE_KEY`].
    pub fn record_value(self) -> &'static str {
        match self {
            GateState::Allowed => VALUE_ALLOWED,
            GateState::Denied => VALUE_DENIED,
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Allowed => f.write_str("allowed"),
            GateState::Denied => f.write_str("denied"),
        }
    }
}

/// A gate state as read back from the store.
///
/// Only exactly `"1"` reads as allowed; any other stored text is treated as
/// denied (a malformed record fails safe). Absence is reported as-is and
/// collapsed to "allowed" by [`StoredGate::allowed_or_default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredGate {
    Allowed,
    Denied,
    Absent,
}

impl StoredGate {
    pub fn from_record_value(value: Option<&str>) -> Self {
        match value {
            None => StoredGate::Absent,
            Some(VALUE_ALLOWED) => StoredGate::Allowed,
            Some(_) => StoredGate::Denied,
        }
    }

    /// Collapse the fail-open default: a missing record never blocks traffic.
    pub fn allowed_or_default(self) -> bool {
        !matches!(self, StoredGate::Denied)
    }
}

impl fmt::Display for StoredGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredGate::Allowed => f.write_str("allowed"),
            StoredGate::Denied => f.write_str("denied"),
            StoredGate::Absent => f.write_str("absent"),
        }
    }
}
