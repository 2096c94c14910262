//! FNV-1a hash utilities for delivery fingerprints.
//!
//! Domain events carry no identity beyond their payload. Consumers that must
//! tolerate redelivery key their "already applied" bookkeeping on a 64-bit
//! FNV-1a hash of the event's canonical encoding.

/// FNV-1a offset basis (64-bit).
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a prime (64-bit).
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Computes a 64-bit FNV-1a hash over raw bytes.
///
/// # Examples
///
/// ```
/// use cardvault_core::hash::fnv1a_64;
///
/// assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
/// assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
/// ```
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
