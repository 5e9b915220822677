//! Driver capability set
//!
//! Callers query capabilities and branch deterministically instead of
//! probing provider behaviour at runtime. A driver that does not carry a
//! capability refuses the operation with `unsupported`.

use davit_common::{Error, Result};
use serde::Serialize;

/// An operation family a storage driver can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
    List,
    Presign,
    Multipart,
    Copy,
    Proxy,
}

/// The capabilities every S3-family provider supports.
pub const ALL: &[Capability] = &[
    Capability::Read,
    Capability::Write,
    Capability::List,
    Capability::Presign,
    Capability::Multipart,
    Capability::Copy,
    Capability::Proxy,
];

/// A fixed capability set carried by a driver.
#[derive(Debug, Clone)]
pub struct CapabilitySet(Vec<Capability>);

impl CapabilitySet {
    #[must_use]
    pub fn all() -> Self {
        Self(ALL.to_vec())
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Refuse with `unsupported` when the capability is absent.
    pub fn ensure(&self, capability: Capability) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "driver does not support {capability:?}"
            )))
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Capability] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_set() {
        let set = CapabilitySet::all();
        assert!(set.has(Capability::Multipart));
        assert!(set.ensure(Capability::Presign).is_ok());
    }

    #[test]
    fn test_missing_capability_refused() {
        let set = CapabilitySet(vec![Capability::Read, Capability::List]);
        assert!(set.has(Capability::Read));
        assert!(matches!(
            set.ensure(Capability::Multipart),
            Err(Error::Unsupported(_))
        ));
    }
}
