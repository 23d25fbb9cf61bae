//! Transmission outcome contracts
//!
//! The network output reports every attempt through `TransmissionHandler`;
//! the policy manager reacts first, observers (diagnostics) after it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Transmission, TransmissionId};

/// Network transmission policy state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    /// Network sends allowed
    #[default]
    Active,
    /// Temporarily suppressed (throttling or transport backoff)
    Throttled,
    /// Suppressed for an extended window (quota exceeded)
    Blocked,
}

impl PolicyState {
    /// Whether the network output may be used
    pub fn allows_network(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Throttled => "throttled",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of one network attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 2xx acknowledgment
    Delivered,
    /// 206: some items accepted, the rest rejected
    PartiallyAccepted { received: usize, accepted: usize },
    /// 401 / 403
    CredentialsRejected,
    /// 408 / 429 / 500 / 503
    Throttled,
    /// 402 / 439
    QuotaExceeded,
    /// No HTTP response (timeout, DNS, refused, redirect loop)
    TransportError,
    /// Any other status code
    Rejected,
}

impl SendOutcome {
    /// Classify an HTTP status code
    pub fn from_status(code: u16) -> Self {
        match code {
            206 => Self::PartiallyAccepted {
                received: 0,
                accepted: 0,
            },
            200..=299 => Self::Delivered,
            401 | 403 => Self::CredentialsRejected,
            408 | 429 | 500 | 503 => Self::Throttled,
            402 | 439 => Self::QuotaExceeded,
            _ => Self::Rejected,
        }
    }

    /// Whether the whole transmission still needs to be retried
    pub fn needs_retry(self) -> bool {
        !matches!(self, Self::Delivered | Self::PartiallyAccepted { .. })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::PartiallyAccepted { .. } => "partial",
            Self::CredentialsRejected => "credentials",
            Self::Throttled => "throttled",
            Self::QuotaExceeded => "quota",
            Self::TransportError => "transport",
            Self::Rejected => "rejected",
        }
    }
}

/// Status codes whose items are worth sending again
pub fn is_retriable_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 439 | 500 | 503)
}

/// Details of one completed network attempt
#[derive(Debug, Clone)]
pub struct TransmissionHandlerArgs<'a> {
    pub transmission: &'a Transmission,
    pub outcome: SendOutcome,
    /// HTTP status, absent on transport errors
    pub response_code: Option<u16>,
    /// Server suggested wait (`Retry-After`)
    pub retry_after: Option<Duration>,
    /// Round-trip time of the attempt
    pub elapsed: Duration,
}

impl TransmissionHandlerArgs<'_> {
    pub fn transmission_id(&self) -> TransmissionId {
        self.transmission.id()
    }
}

/// Observer of transmission outcomes
pub trait TransmissionHandler: Send + Sync {
    fn on_transmission_sent(&self, args: &TransmissionHandlerArgs<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(SendOutcome::from_status(200), SendOutcome::Delivered);
        assert_eq!(SendOutcome::from_status(204), SendOutcome::Delivered);
        assert!(matches!(
            SendOutcome::from_status(206),
            SendOutcome::PartiallyAccepted { .. }
        ));
        assert_eq!(SendOutcome::from_status(401), SendOutcome::CredentialsRejected);
        assert_eq!(SendOutcome::from_status(403), SendOutcome::CredentialsRejected);
        for code in [408, 429, 500, 503] {
            assert_eq!(SendOutcome::from_status(code), SendOutcome::Throttled);
        }
        assert_eq!(SendOutcome::from_status(402), SendOutcome::QuotaExceeded);
        assert_eq!(SendOutcome::from_status(439), SendOutcome::QuotaExceeded);
        assert_eq!(SendOutcome::from_status(400), SendOutcome::Rejected);
        assert_eq!(SendOutcome::from_status(302), SendOutcome::Rejected);
    }

    #[test]
    fn test_needs_retry() {
        assert!(!SendOutcome::Delivered.needs_retry());
        assert!(SendOutcome::Throttled.needs_retry());
        assert!(SendOutcome::TransportError.needs_retry());
    }

    #[test]
    fn test_policy_state_gate() {
        assert!(PolicyState::Active.allows_network());
        assert!(!PolicyState::Throttled.allows_network());
        assert!(!PolicyState::Blocked.allows_network());
        assert_eq!(PolicyState::Blocked.to_string(), "blocked");
    }
}
