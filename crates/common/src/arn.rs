/// Return the region field of an activity ARN.
///
/// `arn:aws:states:us-east-2:123456789012:activity:hello` => `us-east-2`
///
/// ARNs carry the region as the fourth colon-separated field. Returns None
/// for empty input or ARNs with fewer than four fields.
pub fn activity_region(activity_arn: &str) -> Option<&str> {
    if activity_arn.is_empty() {
        return None;
    }

    let mut parts = activity_arn.split(':');
    let region = parts.nth(3)?;
    if region.is_empty() {
        None
    } else {
        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_activity_arn() {
        assert_eq!(
            activity_region("arn:aws:states:us-east-2:123:stateMachine:x"),
            Some("us-east-2")
        );
        assert_eq!(
            activity_region("arn:aws:states:eu-west-1:000000000000:activity:hello"),
            Some("eu-west-1")
        );
    }

    #[test]
    fn test_region_missing() {
        assert_eq!(activity_region(""), None);
        assert_eq!(activity_region("arn:aws:states"), None);
        assert_eq!(activity_region("arn:aws:states:"), None);
        assert_eq!(activity_region("no-colons-at-all"), None);
    }
}
