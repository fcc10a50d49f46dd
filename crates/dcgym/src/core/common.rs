//! Common data structures.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Result of checking whether a host can accommodate a VM's resource
/// demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SuitabilityVerdict {
    Success,
    NotEnoughCores,
    NotEnoughRam,
    NotEnoughBandwidth,
    NotEnoughStorage,
}

impl Display for SuitabilityVerdict {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SuitabilityVerdict::Success => write!(f, "success"),
            SuitabilityVerdict::NotEnoughCores => write!(f, "not enough cores"),
            SuitabilityVerdict::NotEnoughRam => write!(f, "not enough RAM"),
            SuitabilityVerdict::NotEnoughBandwidth => write!(f, "not enough bandwidth"),
            SuitabilityVerdict::NotEnoughStorage => write!(f, "not enough storage"),
        }
    }
}
