use crate::error::ClientError;

const MULTI_LEVEL_WILDCARD: &str = "#";
const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Validates a topic name used in a `publish` call: no wildcards, no empty
/// levels, 1..65535 UTF-8 bytes, no embedded NUL.
pub fn validate_topic_name(topic: &str) -> Result<(), ClientError> {
    validate(topic, false)
}

/// Validates a topic filter used in a `subscribe`/`unsubscribe` call:
/// wildcards are allowed, `#` only as the final level.
pub fn validate_topic_filter(topic: &str) -> Result<(), ClientError> {
    validate(topic, true)
}

fn validate(topic: &str, allow_wildcards: bool) -> Result<(), ClientError> {
    if topic.is_empty() || topic.len() > 65535 {
        return Err(ClientError::InvalidTopic(format!(
            "topic must be 1..65535 bytes, got {}",
            topic.len()
        )));
    }

    if topic.contains('\0') {
        return Err(ClientError::InvalidTopic("topic contains a NUL byte".into()));
    }

    let levels: Vec<&str> = topic.split('/').collect();

    for (i, level) in levels.iter().enumerate() {
        // A leading or trailing separator produces one empty boundary level
        // (e.g. "/finance" or "finance/"), which MQTT treats as a distinct,
        // valid topic level. Any other empty level means two separators
        // were adjacent, which is not.
        if level.is_empty() && i != 0 && i != levels.len() - 1 {
            return Err(ClientError::InvalidTopic(format!(
                "'{}' is invalid: adjacent level separators produce an empty topic level",
                topic
            )));
        }

        if level.contains(MULTI_LEVEL_WILDCARD) {
            if !allow_wildcards {
                return Err(ClientError::InvalidTopic(format!(
                    "'{}' is not a valid publish topic: '#' is a filter-only wildcard",
                    topic
                )));
            }
            if *level != MULTI_LEVEL_WILDCARD || i != levels.len() - 1 {
                return Err(ClientError::InvalidTopic(format!(
                    "'{}' is invalid: '#' may only appear alone as the final level",
                    topic
                )));
            }
        } else if level.contains(SINGLE_LEVEL_WILDCARD) {
            if !allow_wildcards {
                return Err(ClientError::InvalidTopic(format!(
                    "'{}' is not a valid publish topic: '+' is a filter-only wildcard",
                    topic
                )));
            }
            if *level != SINGLE_LEVEL_WILDCARD {
                return Err(ClientError::InvalidTopic(format!(
                    "'{}' is invalid: '+' must occupy a whole level",
                    topic
                )));
            }
        }
    }

    Ok(())
}

/// Matches a publish topic against a subscription filter, per the
/// level-by-level wildcard rules: `+` matches exactly one level, `#` matches
/// all remaining levels (including zero) and may only trail the pattern.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => continue,
            (Some(SINGLE_LEVEL_WILDCARD), None) => return false,
            (Some(f), Some(t)) if f == t => continue,
            (Some(_), _) => return false,
            (None, None) => return true,
            (None, Some(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wildcards_in_publish_topics() {
        assert!(validate_topic_name("a/#").is_err());
        assert!(validate_topic_name("a/+/b").is_err());
        assert!(validate_topic_name("sensors/a/temp").is_ok());
    }

    #[test]
    fn rejects_adjacent_separators() {
        assert!(validate_topic_name("a//b").is_err());
        assert!(validate_topic_filter("a//b").is_err());
        assert!(validate_topic_filter("a///b").is_err());
    }

    #[test]
    fn allows_single_leading_or_trailing_separator() {
        assert!(validate_topic_name("/finance").is_ok());
        assert!(validate_topic_name("finance/").is_ok());
    }

    #[test]
    fn allows_wildcards_in_filters() {
        assert!(validate_topic_filter("sensors/+/temp").is_ok());
        assert!(validate_topic_filter("sensors/#").is_ok());
        assert!(validate_topic_filter("sensors/#/temp").is_err());
        assert!(validate_topic_filter("a/b#").is_err());
    }

    #[test]
    fn matches_single_level_wildcard() {
        assert!(matches("sensors/+/temp", "sensors/a/temp"));
        assert!(!matches("sensors/+/temp", "sensors/a/b/temp"));
    }

    #[test]
    fn matches_multi_level_wildcard() {
        assert!(matches("sensors/#", "sensors"));
        assert!(matches("sensors/#", "sensors/a"));
        assert!(matches("sensors/#", "sensors/a/b"));
        assert!(!matches("sensors/#", "other/a"));
    }

    #[test]
    fn matches_exact_topic() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b/c", "a/b/c/d"));
    }
}
