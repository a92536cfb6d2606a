/// Maximum size in bytes the service accepts for a failure cause.
pub const MAX_CAUSE_BYTES: usize = 32768;

const ELLIPSIS: &str = "...";

/// Bound a failure cause to the service limit.
///
/// Causes longer than the limit are cut to a prefix and the last three
/// bytes are replaced with a literal `...`. The cut lands on a UTF-8
/// boundary, so a multi-byte cause may come out a byte or two short of
/// the limit; ASCII causes come out at exactly the limit.
pub fn safe_cause(cause: &str) -> String {
    if cause.len() <= MAX_CAUSE_BYTES {
        return cause.to_string();
    }

    let mut cut = MAX_CAUSE_BYTES - ELLIPSIS.len();
    while cut > 0 && !cause.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = String::with_capacity(cut + ELLIPSIS.len());
    truncated.push_str(&cause[..cut]);
    truncated.push_str(ELLIPSIS);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_cause_unchanged() {
        assert_eq!(safe_cause("boom"), "boom");
        assert_eq!(safe_cause(""), "");
    }

    #[test]
    fn test_cause_at_limit_unchanged() {
        let cause = "x".repeat(MAX_CAUSE_BYTES);
        assert_eq!(safe_cause(&cause), cause);
    }

    #[test]
    fn test_long_cause_truncated_with_ellipsis() {
        let cause = "a".repeat(40000);
        let truncated = safe_cause(&cause);
        assert_eq!(truncated.len(), MAX_CAUSE_BYTES);
        assert!(truncated.ends_with("..."));
        assert!(truncated[..MAX_CAUSE_BYTES - 3].bytes().all(|b| b == b'a'));
    }

    #[test]
    fn test_multibyte_cause_respects_char_boundary() {
        // Each 'é' is two bytes; the cut must not split one.
        let cause = "é".repeat(20000);
        let truncated = safe_cause(&cause);
        assert!(truncated.len() <= MAX_CAUSE_BYTES);
        assert!(truncated.ends_with("..."));
        assert!(truncated.is_char_boundary(truncated.len() - 3));
    }
}
