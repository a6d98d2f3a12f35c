use crate::core::{DaoError, Result};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bit set of per-operation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationFlags(u32);

impl OperationFlags {
    pub const NONE: Self = Self(0);

    /// The operation may share one transaction with adjacent mergeable operations
    pub const MERGE_TX: Self = Self(1);

    /// Capture a backtrace of the enqueuing call site
    pub const TRACK_CREATOR_STACKTRACE: Self = Self(1 << 2);

    const KNOWN: u32 = Self::MERGE_TX.0 | Self::TRACK_CREATOR_STACKTRACE.0;

    /// Build from raw bits, rejecting anything undefined
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::KNOWN != 0 {
            return Err(DaoError::ProtocolMisuse(format!(
                "unknown operation flag bits: {:#x}",
                bits & !Self::KNOWN
            )));
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for OperationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for OperationFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for OperationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::MERGE_TX) {
            names.push("MERGE_TX");
        }
        if self.contains(Self::TRACK_CREATOR_STACKTRACE) {
            names.push("TRACK_CREATOR_STACKTRACE");
        }
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}
