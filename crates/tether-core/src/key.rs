//! Correlation keys linking an issued host request to its later callback.
//!
//! A key is `{kind, code}`. The `kind` namespaces request types so an
//! activity result and a permission result with the same numeric code never
//! collide; the `code` is what actually travels through the host and back,
//! and the host only addresses 16 bits of it.
//!
//! Codes are either supplied by the caller or derived from the request
//! payload with SipHash-1-3 (fixed keys, so stable across runs) masked to
//! [`REQUEST_CODE_MASK`].

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::error::KeyError;

/// Mask applied to payload hashes; matches the host's 16-bit request codes.
pub const REQUEST_CODE_MASK: u64 = 0x0000_FFFF;

// ---------------------------------------------------------------------------
// RequestCode
// ---------------------------------------------------------------------------

/// Host-addressable request code in `[0, 65535]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestCode(u16);

impl RequestCode {
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Derive a code from request content.
    ///
    /// Deterministic for equal payloads. Distinct payloads may collide; a
    /// collision between two in-flight requests surfaces as
    /// [`crate::error::RegistryError::DuplicateKey`].
    #[must_use]
    pub fn derive<P: Hash + ?Sized>(payload: &P) -> Self {
        let mut hasher = SipHasher13::new();
        payload.hash(&mut hasher);
        Self((hasher.finish() & REQUEST_CODE_MASK) as u16)
    }

    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for RequestCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl TryFrom<i32> for RequestCode {
    type Error = KeyError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        u16::try_from(code)
            .map(Self)
            .map_err(|_| KeyError::OutOfRange {
                code: i64::from(code),
            })
    }
}

impl TryFrom<u32> for RequestCode {
    type Error = KeyError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        u16::try_from(code)
            .map(Self)
            .map_err(|_| KeyError::OutOfRange {
                code: i64::from(code),
            })
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RequestKind
// ---------------------------------------------------------------------------

/// Namespace distinguishing request kinds that share the code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Start another screen and wait for its result.
    ActivityResult,
    /// Prompt for runtime permissions and wait for the verdict.
    PermissionRequest,
}

impl RequestKind {
    #[must_use]
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::ActivityResult => "activity",
            Self::PermissionRequest => "permission",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

// ---------------------------------------------------------------------------
// CorrelationKey
// ---------------------------------------------------------------------------

/// Registry key for one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub kind: RequestKind,
    pub code: RequestCode,
}

impl CorrelationKey {
    #[must_use]
    pub const fn new(kind: RequestKind, code: RequestCode) -> Self {
        Self { kind, code }
    }

    #[must_use]
    pub const fn activity(code: RequestCode) -> Self {
        Self::new(RequestKind::ActivityResult, code)
    }

    #[must_use]
    pub const fn permission(code: RequestCode) -> Self {
        Self::new(RequestKind::PermissionRequest, code)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.code)
    }
}
