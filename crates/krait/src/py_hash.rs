//! Hashing helpers for dict keys and the `hash` slot.
//!
//! ## Cross-type hash invariant
//!
//! Python guarantees that if `a == b` then `hash(a) == hash(b)`. Since
//! `0 == 0.0 == False` and `1 == 1.0 == True`, the hash functions for int,
//! float and bool must agree on equivalent inputs. The numeric helpers here
//! implement the Mersenne-prime modular algorithm CPython uses in
//! `Objects/longobject.c` and `Objects/floatobject.c`.
//!
//! String hashing is deterministic (no per-process seed): an interpreter
//! core without the `-R` surface gains nothing from randomization, and
//! deterministic hashes keep dict iteration order reproducible in tests.

use std::hash::{Hash, Hasher};

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

/// Mersenne prime used for numeric hashing: `2^61 - 1`.
const MODULUS: u64 = (1 << 61) - 1;

/// Hashes a signed 64-bit integer with the modular algorithm.
///
/// The result is `n % MODULUS` with the sign preserved, and a result of
/// `-1` remapped to `-2` (CPython reserves `-1` as an error sentinel; the
/// remap is kept so hashes match across implementations).
#[must_use]
pub(crate) fn hash_i64(value: i64) -> i64 {
    if value == 0 {
        return 0;
    }
    let sign: i64 = if value < 0 { -1 } else { 1 };
    let abs = i128::from(value).unsigned_abs() as u64;
    let remainder = (abs % MODULUS) as i64;
    let result = sign * remainder;
    if result == -1 { -2 } else { result }
}

/// Hashes an arbitrary-precision integer with the same modular algorithm.
#[must_use]
pub(crate) fn hash_bigint(value: &BigInt) -> i64 {
    if value.is_zero() {
        return 0;
    }
    let modulus = BigInt::from(MODULUS);
    let remainder = value.abs() % &modulus;
    // remainder < 2^61, always fits
    let mut result = remainder.to_i64().unwrap_or(0);
    if value.is_negative() {
        result = -result;
    }
    if result == -1 { -2 } else { result }
}

/// Hashes an `f64` so that integral floats agree with their int equivalents.
///
/// Follows CPython's `_Py_HashDouble`: decompose the float into mantissa and
/// exponent, fold the mantissa into the modulus 2^61 - 1 ring, then rotate
/// by the exponent. NaN hashes to 0 here (the core has no object identities
/// to fall back on) and infinities use CPython's fixed sentinels.
#[must_use]
pub(crate) fn hash_f64(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    if value.is_infinite() {
        return if value > 0.0 { 314_159 } else { -314_159 };
    }
    if value == 0.0 {
        return 0;
    }

    let negative = value < 0.0;
    let mut m = value.abs();
    let mut e = 0i32;

    // Normalize m into [0.5, 1.0), tracking the binary exponent.
    while m >= 1.0 {
        m /= 2.0;
        e += 1;
    }
    while m < 0.5 {
        m *= 2.0;
        e -= 1;
    }

    // Fold 28 mantissa bits at a time into x, modulo 2^61 - 1.
    let mut x: u64 = 0;
    while m != 0.0 {
        x = ((x << 28) & MODULUS) | (x >> (61 - 28));
        m *= 268_435_456.0; // 2^28
        e -= 28;
        let y = m as u64;
        m -= y as f64;
        x += y;
        if x >= MODULUS {
            x -= MODULUS;
        }
    }

    // Rotate by the remaining exponent.
    let e = e.rem_euclid(61) as u32;
    if e != 0 {
        x = ((x << e) & MODULUS) | (x >> (61 - e));
    }

    let mut result = x as i64;
    if negative {
        result = -result;
    }
    if result == -1 { -2 } else { result }
}

/// Hashes string content deterministically.
#[must_use]
pub(crate) fn hash_str(value: &str) -> i64 {
    if value.is_empty() {
        return 0;
    }
    let mut hasher = ahash::AHasher::default();
    value.hash(&mut hasher);
    let signed = hasher.finish() as i64;
    if signed == -1 { -2 } else { signed }
}

/// Mixes a sequence of element hashes into a tuple hash.
///
/// Uses the xxPrime-based combination from CPython's `tuplehash` so that
/// equal tuples hash equally regardless of how they were built.
#[must_use]
pub(crate) fn hash_tuple_lanes(lanes: impl Iterator<Item = i64>) -> i64 {
    const PRIME1: u64 = 11_400_714_785_074_694_791;
    const PRIME2: u64 = 14_029_467_366_897_019_727;
    const PRIME5: u64 = 2_870_177_450_012_600_261;

    let mut acc = PRIME5;
    let mut len: u64 = 0;
    for lane in lanes {
        len += 1;
        acc = acc.wrapping_add((lane as u64).wrapping_mul(PRIME2));
        acc = acc.rotate_left(31);
        acc = acc.wrapping_mul(PRIME1);
    }
    acc = acc.wrapping_add(len ^ (PRIME5 ^ 3_527_539));

    let signed = acc as i64;
    if signed == -1 { 1_546_275_796 } else { signed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_float_bool_agree() {
        assert_eq!(hash_i64(0), 0);
        assert_eq!(hash_i64(1), hash_f64(1.0));
        assert_eq!(hash_i64(1), 1);
        assert_eq!(hash_i64(-2), hash_f64(-2.0));
        assert_eq!(hash_i64(123_456_789), hash_f64(123_456_789.0));
    }

    #[test]
    fn bigint_agrees_with_small() {
        assert_eq!(hash_bigint(&BigInt::from(42)), hash_i64(42));
        assert_eq!(hash_bigint(&BigInt::from(-7)), hash_i64(-7));
        assert_eq!(hash_bigint(&BigInt::from(i64::MAX)), hash_i64(i64::MAX));
    }

    #[test]
    fn minus_one_is_remapped() {
        assert_eq!(hash_i64(-1), -2);
        assert_eq!(hash_f64(-1.0), -2);
        assert_eq!(hash_bigint(&BigInt::from(-1)), -2);
    }

    #[test]
    fn large_modular_reduction() {
        // 2^61 - 1 hashes to 0 in the Mersenne ring.
        let m = (1i64 << 61) - 1;
        assert_eq!(hash_i64(m), 0);
        assert_eq!(hash_i64(m + 1), 1);
    }

    #[test]
    fn tuple_hash_is_order_sensitive() {
        let a = hash_tuple_lanes([1, 2, 3].into_iter());
        let b = hash_tuple_lanes([3, 2, 1].into_iter());
        assert_ne!(a, b);
        let c = hash_tuple_lanes([1, 2, 3].into_iter());
        assert_eq!(a, c);
    }
}
