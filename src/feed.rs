//! Feed identity
//!
//! A feed is one named upstream stream from the configured list. Names are
//! validated once, at construction, because they are interpolated into tool
//! URLs and the overlay label.

use crate::error::{FeedwatchError, Result};

const MAX_FEED_NAME_LEN: usize = 64;
const NUMBERED_PREFIX: &str = "vant";

/// A validated feed with its derived display label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feed {
    name: String,
    label: String,
}

impl Feed {
    /// Create a feed, rejecting names outside `[A-Za-z0-9_-]{1,64}`
    pub fn new(name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            label: display_label(name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label drawn over the video (e.g. `vant3` -> `VANT-3`)
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FeedwatchError::InvalidFeedName(
            "feed name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_FEED_NAME_LEN {
        return Err(FeedwatchError::InvalidFeedName(format!(
            "{} exceeds {} characters",
            name, MAX_FEED_NAME_LEN
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(FeedwatchError::InvalidFeedName(format!(
            "{:?} contains disallowed character {:?}",
            name, bad
        )));
    }
    Ok(())
}

/// Derive the overlay label for a feed name.
///
/// `vantN` (any case, N all digits) becomes `VANT-N`; anything else is
/// uppercased.
pub fn display_label(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if let Some(suffix) = lower.strip_prefix(NUMBERED_PREFIX) {
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return format!("VANT-{}", suffix);
        }
    }
    name.to_uppercase()
}

/// Build feeds from configured names, rejecting invalid or duplicate entries
pub fn feeds_from_names(names: &[String]) -> Result<Vec<Feed>> {
    let mut feeds: Vec<Feed> = Vec::with_capacity(names.len());
    for name in names {
        let feed = Feed::new(name)?;
        if feeds.iter().any(|f| f.name() == feed.name()) {
            return Err(FeedwatchError::InvalidFeedName(format!(
                "{} is listed more than once",
                name
            )));
        }
        feeds.push(feed);
    }
    Ok(feeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_feed_label() {
        assert_eq!(display_label("vant1"), "VANT-1");
        assert_eq!(display_label("VANT12"), "VANT-12");
        assert_eq!(display_label("Vant007"), "VANT-007");
    }

    #[test]
    fn test_other_feed_label_is_uppercased() {
        assert_eq!(display_label("vant"), "VANT");
        assert_eq!(display_label("vant1a"), "VANT1A");
        assert_eq!(display_label("drone_north"), "DRONE_NORTH");
    }

    #[test]
    fn test_feed_name_validation() {
        assert!(Feed::new("vant1").is_ok());
        assert!(Feed::new("cam-2_b").is_ok());
        assert!(Feed::new("").is_err());
        assert!(Feed::new("vant 1").is_err());
        assert!(Feed::new("vant1'").is_err());
        assert!(Feed::new("a/b").is_err());
        assert!(Feed::new(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_duplicate_feeds_rejected() {
        let names = vec!["vant1".to_string(), "vant2".to_string(), "vant1".to_string()];
        let err = feeds_from_names(&names).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
