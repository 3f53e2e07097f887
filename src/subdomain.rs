//! The 4-character subdomain cursor the implant uses to detect that a new
//! downlink frame is available. It's a base-26 little-endian counter over
//! `'a'..='z'`: incrementing the last character wraps with carry into the
//! next, exactly like an odometer, except the least-significant digit is
//! the *last* character of the string.

const MIN: u8 = b'a';
const MAX: u8 = b'z';

/// The reset sentinel. An implant returning to "aaaa" is starting a new
/// session over an existing socket (a MIGRATION in the original's parlance).
pub const RESET_SENTINEL: &str = "aaaa";

/// Returns the next cursor value after `current`, carrying `'z'` to `'a'`
/// the way a 4-digit base-26 counter would. `next_subdomain("zzzz") ==
/// "aaaa"`.
pub fn next_subdomain(current: &str) -> String {
    let mut bytes: Vec<u8> = current.bytes().collect();
    debug_assert_eq!(bytes.len(), 4, "subdomain cursor must be 4 characters");
    for b in bytes.iter_mut().rev() {
        debug_assert!((MIN..=MAX).contains(b));
        if *b == MAX {
            *b = MIN;
            // carry into the next (more significant, i.e. earlier) digit
        } else {
            *b += 1;
            return String::from_utf8(bytes).expect("ascii");
        }
    }
    // every digit carried: this is the zzzz -> aaaa wraparound
    String::from_utf8(bytes).expect("ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_last_character_first() {
        assert_eq!(next_subdomain("aaaa"), "aaab");
        assert_eq!(next_subdomain("aaaz"), "aaba");
        assert_eq!(next_subdomain("aazz"), "abaa");
    }

    #[test]
    fn zzzz_wraps_to_aaaa() {
        assert_eq!(next_subdomain("zzzz"), "aaaa");
    }

    #[test]
    fn is_a_bijection_over_a_representative_subspace() {
        // Exhaustively checking all 26^4 values is unnecessary; walk the
        // full cycle of the last two characters (26^2) and confirm no two
        // starting points collide and the cycle returns to its start.
        let mut seen = std::collections::HashSet::new();
        let mut cur = "aaaa".to_string();
        for _ in 0..(26 * 26) {
            assert!(seen.insert(cur.clone()), "duplicate cursor value {cur}");
            cur = next_subdomain(&cur);
        }
        assert_eq!(cur, "aaaa");
    }

    #[test]
    fn monotone_per_single_increment_within_a_letter() {
        assert_eq!(next_subdomain("aaba"), "aabb");
        assert_eq!(next_subdomain("abzz"), "acaa");
    }
}
