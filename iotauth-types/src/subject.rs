//! Composite `domain_user` subject encoding (§3, §4.5.5).
//!
//! For user→domain membership, the effective subject written into policy
//! tuples and token claims is `domain || "_" || user`. Both halves must be
//! non-empty; decoding splits on the *first* `_` so a user id containing an
//! underscore still round-trips.

/// Encode `(domain, user)` into the composite subject id. Returns an empty
/// string if either half is empty, per the invariant that an encoded subject
/// is only ever meaningful when both halves are present.
#[must_use]
pub fn encode(domain: &str, user: &str) -> String {
    if domain.is_empty() || user.is_empty() {
        return String::new();
    }
    format!("{domain}_{user}")
}

/// Decode a composite subject id into `(domain, user)`. Returns `None` if
/// `subject` has no `_` separator, or either resulting half is empty.
#[must_use]
pub fn decode(subject: &str) -> Option<(&str, &str)> {
    let (domain, user) = subject.split_once('_')?;
    if domain.is_empty() || user.is_empty() {
        return None;
    }
    Some((domain, user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let encoded = encode("d1", "u1");
        assert_eq!(encoded, "d1_u1");
        assert_eq!(decode(&encoded), Some(("d1", "u1")));
    }

    #[test]
    fn empty_halves_yield_empty_string() {
        assert_eq!(encode("", "u1"), "");
        assert_eq!(encode("d1", ""), "");
        assert_eq!(encode("", ""), "");
    }

    #[test]
    fn decode_splits_on_first_underscore() {
        assert_eq!(decode("d1_u1_extra"), Some(("d1", "u1_extra")));
    }

    #[test]
    fn decode_rejects_missing_or_empty_halves() {
        assert_eq!(decode("noseparator"), None);
        assert_eq!(decode("_u1"), None);
        assert_eq!(decode("d1_"), None);
    }
}
