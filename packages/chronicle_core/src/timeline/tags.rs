//! Tag extraction from node descriptions
//!
//! A tag is a word starting with `@`, containing letters, digits,
//! underscores, and hyphens. The `@` is kept as part of the tag.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@[\w-]+").expect("tag regex"));

/// Extract the unique tags from a text, in first-occurrence order.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for m in TAG_RE.find_iter(text) {
        let tag = m.as_str();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_tags_with_at_prefix() {
        let tags = extract_tags("The @Spice-Guild rises while @Atreides watches");
        assert_eq!(tags, vec!["@Spice-Guild", "@Atreides"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let tags = extract_tags("@hero meets @villain then @hero flees");
        assert_eq!(tags, vec!["@hero", "@villain"]);
    }

    #[test]
    fn test_no_tags() {
        assert!(extract_tags("an untagged description").is_empty());
        assert!(extract_tags("").is_empty());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "a @b c @d-e";
        let once = extract_tags(text);
        let again = extract_tags(&once.join(" "));
        assert_eq!(once, again);
    }

    #[test]
    fn test_punctuation_terminates_tag() {
        assert_eq!(extract_tags("ask @oracle, then leave"), vec!["@oracle"]);
    }
}
