//! The security/token layer is an external collaborator kept only at
//! interface level: the slot manager treats tokens as
//! opaque and either presents them to a validator or trusts an "insecure"
//! slot without one.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Insecure,
    Secure,
}

/// An opaque capability presented alongside every operation on a secure
/// [`crate::manager::SlotManager`]. Real token mechanics (hardware
/// fingerprint, wall-clock TTL, random entropy) are generated and checked
/// by an external collaborator; this crate only defines the contract it
/// validates against.
pub trait TokenCapability {
    /// Validates the token in constant time, independent of *why* it is
    /// invalid (expired vs. forged vs. wrong slot).
    fn validate_constant_time(&self) -> bool;

    /// Wall-clock expiry, if the token carries one.
    fn is_expired(&self) -> bool {
        false
    }
}

/// A token that is always accepted — useful for tests and for embedding
/// this crate in a host that has already authenticated the caller through
/// some other channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValidToken;

impl TokenCapability for AlwaysValidToken {
    fn validate_constant_time(&self) -> bool {
        true
    }
}

/// A minimal illustrative token: an opaque byte string compared against an
/// expected value in constant time (`subtle`-style, hand-rolled to avoid a
/// dependency for a four-line comparison). Does not implement hardware
/// fingerprinting or TTLs — those live outside this crate's scope.
#[derive(Debug, Clone)]
pub struct OpaqueToken {
    bytes: Vec<u8>,
}

impl OpaqueToken {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Validates an [`OpaqueToken`] against an expected value in constant
/// time, so mismatches don't leak how many leading bytes matched via
/// timing.
pub struct ConstantTimeValidator {
    expected: Vec<u8>,
}

impl ConstantTimeValidator {
    #[must_use]
    pub fn new(expected: Vec<u8>) -> Self {
        Self { expected }
    }

    #[must_use]
    pub fn check(&self, token: &OpaqueToken) -> bool {
        if token.bytes.len() != self.expected.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in token.bytes.iter().zip(self.expected.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl TokenCapability for OpaqueToken {
    fn validate_constant_time(&self) -> bool {
        // Without an injected validator an `OpaqueToken` on its own cannot
        // know the expected value; callers that need real validation
        // should check it via `ConstantTimeValidator::check` before
        // presenting it, or wrap it in a type that captures the validator.
        !self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_validator_matches_equal_tokens() {
        let validator = ConstantTimeValidator::new(vec![1, 2, 3, 4]);
        assert!(validator.check(&OpaqueToken::new(vec![1, 2, 3, 4])));
        assert!(!validator.check(&OpaqueToken::new(vec![1, 2, 3, 5])));
        assert!(!validator.check(&OpaqueToken::new(vec![1, 2, 3])));
    }
}
