//! Security helpers shared by the HTTP surface.

/// Compare two byte strings without short-circuiting on the first mismatch.
///
/// Length differences return early; the lengths of configured secrets are
/// not considered sensitive.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}
