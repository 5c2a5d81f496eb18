//! Commitment levels
//!
//! A commitment level is a network-finality ordinal describing how durable an
//! observation of a transaction is. Comparisons throughout the confirmation
//! engine use the `processed < confirmed < finalized` ordering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network finality ordinal: `Processed < Confirmed < Finalized`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    /// Wire representation used in JSON-RPC params.
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }

    /// Whether an observation at `observed` satisfies this requested level.
    pub fn satisfied_by(&self, observed: Commitment) -> bool {
        observed >= *self
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown commitment level: {0}")]
pub struct InvalidCommitment(String);

impl FromStr for Commitment {
    type Err = InvalidCommitment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(InvalidCommitment(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_ordering() {
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Finalized);
    }

    #[test]
    fn test_satisfied_by_uses_ordinal_comparison() {
        assert!(Commitment::Processed.satisfied_by(Commitment::Finalized));
        assert!(Commitment::Confirmed.satisfied_by(Commitment::Confirmed));
        assert!(!Commitment::Finalized.satisfied_by(Commitment::Confirmed));
    }

    #[test]
    fn test_round_trip_through_wire_strings() {
        for commitment in [
            Commitment::Processed,
            Commitment::Confirmed,
            Commitment::Finalized,
        ] {
            assert_eq!(commitment.as_str().parse::<Commitment>(), Ok(commitment));
        }
        assert!("recent".parse::<Commitment>().is_err());
    }
}
