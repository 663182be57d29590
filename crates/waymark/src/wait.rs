//! Page lifecycle states and wait bounds.

use std::fmt;
use std::time::Duration;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default bound for lifecycle waits (30 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Polling interval for element waits (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Quiet period with no in-flight requests that counts as network idle (500ms)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

/// Visibility bound used by input helpers (5 seconds)
pub const INPUT_VISIBLE_TIMEOUT_MS: u64 = 5_000;

/// Visibility bound used when highlighting several elements (10 seconds)
pub const HIGHLIGHT_VISIBLE_TIMEOUT_MS: u64 = 10_000;

/// Default bound for `wait_for_api_call` (20 seconds)
pub const API_CALL_TIMEOUT_MS: u64 = 20_000;

// =============================================================================
// LOAD STATE
// =============================================================================

/// Page load states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// The `load` event has fired
    Load,
    /// The `DOMContentLoaded` event has fired
    DomContentLoaded,
    /// No requests in flight for [`NETWORK_IDLE_THRESHOLD_MS`]
    NetworkIdle,
}

impl LoadState {
    /// Event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkidle",
        }
    }

    /// Default bound for this load state
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        match self {
            Self::Load | Self::DomContentLoaded => Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            Self::NetworkIdle => Duration::from_millis(2 * DEFAULT_WAIT_TIMEOUT_MS),
        }
    }
}

impl Default for LoadState {
    fn default() -> Self {
        Self::Load
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

// =============================================================================
// ELEMENT WAIT STATE
// =============================================================================

/// Element condition awaited by `PageDriver::wait_for`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitState {
    /// At least one element matches
    Attached,
    /// No element matches
    Detached,
    /// At least one matching element is rendered
    Visible,
    /// No matching element is rendered
    Hidden,
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(LoadState::Load.event_name(), "load");
        assert_eq!(LoadState::DomContentLoaded.event_name(), "DOMContentLoaded");
        assert_eq!(LoadState::NetworkIdle.to_string(), "networkidle");
    }

    #[test]
    fn test_network_idle_waits_longer() {
        assert!(LoadState::NetworkIdle.default_timeout() > LoadState::Load.default_timeout());
    }

    #[test]
    fn test_wait_state_display() {
        assert_eq!(WaitState::Visible.to_string(), "visible");
        assert_eq!(WaitState::Detached.to_string(), "detached");
    }
}
