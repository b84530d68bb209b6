//! Constant-time comparisons
//!
//! Used wherever a client-supplied value is compared against a value the
//! server derived or holds.

use subtle::ConstantTimeEq;

/// Constant-time byte comparison; lengths are not secret
pub fn constant_time_bytes_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Constant-time string comparison (event ids, subjects)
pub fn constant_time_str_compare(a: &str, b: &str) -> bool {
    constant_time_bytes_compare(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_compare() {
        let id = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36";
        let other = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f37";

        assert!(constant_time_str_compare(id, id));
        assert!(!constant_time_str_compare(id, other));
        assert!(!constant_time_str_compare(id, &id[..63]));
        assert!(constant_time_str_compare("", ""));
    }

    #[test]
    fn test_bytes_compare_length_mismatch() {
        assert!(!constant_time_bytes_compare(&[1u8; 32], &[1u8; 31]));
        assert!(constant_time_bytes_compare(&[9u8; 64], &[9u8; 64]));
    }
}
