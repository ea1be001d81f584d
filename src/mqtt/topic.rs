//! MQTT subscription pattern matching.
//!
//! Supports the two MQTT wildcards:
//! - `+` matches exactly one topic level
//! - `#` matches every remaining level
//!
//! ```text
//! matches("a/b/c",   "a/+/c") == true
//! matches("a/b",     "a/+/c") == false
//! matches("a/b/c/d", "a/#")   == true
//! ```

/// Returns `true` when `topic` satisfies the subscription `pattern`.
///
/// Leading and trailing `/` are ignored on both sides. The function is total:
/// it never panics and returns `false` for empty input.
pub fn matches(topic: &str, pattern: &str) -> bool {
    if topic.is_empty() || pattern.is_empty() {
        return false;
    }

    if topic == pattern || pattern == "#" {
        return true;
    }

    let topic_parts: Vec<&str> = topic.trim().trim_matches('/').split('/').collect();
    let pattern_parts: Vec<&str> = pattern.trim().trim_matches('/').split('/').collect();

    if topic_parts.len() < pattern_parts.len() {
        return false;
    }

    for (index, token) in pattern_parts.iter().enumerate() {
        match *token {
            "#" => return true,
            "+" => continue,
            literal if literal == topic_parts[index] => continue,
            _ => return false,
        }
    }

    // Without a `#` the pattern has to consume the whole topic
    topic_parts.len() == pattern_parts.len()
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn single_level_wildcard_consumes_one_segment() {
        assert!(matches("a/b/c", "a/+/c"));
        assert!(!matches("a/b", "a/+/c"));
        assert!(!matches("a/b/c/d", "a/+/c"));
    }

    #[test]
    fn multi_level_wildcard_consumes_the_rest() {
        assert!(matches("a/b/c/d", "a/#"));
        assert!(matches("a/b", "a/#"));
        assert!(matches("anything/at/all", "#"));
    }

    #[test]
    fn literal_patterns_need_the_full_topic() {
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/x/c", "a/b/c"));
    }

    #[test]
    fn surrounding_slashes_are_ignored() {
        assert!(matches("/a/b/", "a/+"));
        assert!(matches("a/b", "/a/b/"));
    }

    #[test]
    fn empty_input_never_matches() {
        assert!(!matches("", "a/b"));
        assert!(!matches("a/b", ""));
        assert!(!matches("", ""));
    }

    #[test]
    fn bridge_subscriptions_route_as_expected() {
        let controller = "cloudapp/QBUSMQTTGW/+/state";
        let entity = "cloudapp/QBUSMQTTGW/+/+/state";

        assert!(matches("cloudapp/QBUSMQTTGW/UL1/state", controller));
        assert!(!matches("cloudapp/QBUSMQTTGW/UL1/UL15/state", controller));
        assert!(matches("cloudapp/QBUSMQTTGW/UL1/UL15/state", entity));
        assert!(!matches("cloudapp/QBUSMQTTGW/state", controller));
        assert!(!matches("cloudapp/QBUSMQTTGW/config", entity));
    }
}
