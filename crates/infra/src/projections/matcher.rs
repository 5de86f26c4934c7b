//! Routing patterns compiled once at registration time.

/// A compiled routing pattern.
///
/// | pattern   | matcher               |
/// |-----------|-----------------------|
/// | `*`, `**` | `Any`                 |
/// | `*X*`     | `Contains("X")`       |
/// | `X*`      | `PrefixOf("X")`       |
/// | `*X`      | `SuffixOf("X")`       |
/// | `X`       | `Exact("X")`          |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternMatcher {
    Any,
    Exact(String),
    PrefixOf(String),
    SuffixOf(String),
    Contains(String),
}

impl PatternMatcher {
    pub fn compile(pattern: &str) -> Self {
        if pattern == "*" || pattern == "**" {
            return PatternMatcher::Any;
        }

        let leading = pattern.starts_with('*');
        let trailing = pattern.ends_with('*');

        match (leading, trailing) {
            (true, true) => PatternMatcher::Contains(pattern[1..pattern.len() - 1].to_string()),
            (false, true) => PatternMatcher::PrefixOf(pattern[..pattern.len() - 1].to_string()),
            (true, false) => PatternMatcher::SuffixOf(pattern[1..].to_string()),
            (false, false) => PatternMatcher::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, reason: &str) -> bool {
        match self {
            PatternMatcher::Any => true,
            PatternMatcher::Exact(s) => reason == s,
            PatternMatcher::PrefixOf(s) => reason.starts_with(s.as_str()),
            PatternMatcher::SuffixOf(s) => reason.ends_with(s.as_str()),
            PatternMatcher::Contains(s) => reason.contains(s.as_str()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, PatternMatcher::Exact(_))
    }
}

impl From<&str> for PatternMatcher {
    fn from(value: &str) -> Self {
        PatternMatcher::compile(value)
    }
}
