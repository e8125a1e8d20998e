//! Glob patterns for key listing
//!
//! Supports a single metacharacter: `*` matches any run of characters.
//! Everything else is literal, including characters that are regex
//! metacharacters. Compiled once and reused across an index scan.

use regex::Regex;

use crate::error::Result;

/// A compiled key pattern
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// The bare `*` pattern: matches every key without a regex engine
    All,
    /// Anchored regex compiled from the glob
    Matcher(Regex),
}

impl KeyPattern {
    /// Compile a glob pattern. Runs of `*` collapse to one wildcard; all
    /// other regex metacharacters are treated as literals; the pattern is
    /// anchored at both ends.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(KeyPattern::All);
        }

        let mut regex = String::with_capacity(pattern.len() + 8);
        regex.push('^');
        let mut prev_star = false;
        for ch in pattern.chars() {
            if ch == '*' {
                if !prev_star {
                    regex.push_str(".*");
                }
                prev_star = true;
                continue;
            }
            prev_star = false;
            if is_meta(ch) {
                regex.push('\\');
            }
            regex.push(ch);
        }
        regex.push('$');

        Ok(KeyPattern::Matcher(Regex::new(&regex)?))
    }

    /// Whether a key matches this pattern.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Matcher(re) => re.is_match(key),
        }
    }
}

fn is_meta(ch: char) -> bool {
    matches!(
        ch,
        '\\' | '.' | '+' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '#' | '&' | '-' | '~'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_all() {
        let pattern = KeyPattern::compile("*").unwrap();
        assert!(matches!(pattern, KeyPattern::All));
        assert!(pattern.matches(""));
        assert!(pattern.matches("anything at all"));
    }

    #[test]
    fn test_literal() {
        let pattern = KeyPattern::compile("user:42").unwrap();
        assert!(pattern.matches("user:42"));
        assert!(!pattern.matches("user:421"));
        assert!(!pattern.matches("xuser:42"));
    }

    #[test]
    fn test_wildcard_positions() {
        let prefix = KeyPattern::compile("session:*").unwrap();
        assert!(prefix.matches("session:abc"));
        assert!(prefix.matches("session:"));
        assert!(!prefix.matches("sessions"));

        let suffix = KeyPattern::compile("*.json").unwrap();
        assert!(suffix.matches("report.json"));
        assert!(!suffix.matches("report.jsonl"));

        let middle = KeyPattern::compile("a*z").unwrap();
        assert!(middle.matches("az"));
        assert!(middle.matches("a-whole-lot-z"));
        assert!(!middle.matches("a-whole-lot-z!"));
    }

    #[test]
    fn test_star_runs_collapse() {
        let pattern = KeyPattern::compile("a***b").unwrap();
        assert!(pattern.matches("ab"));
        assert!(pattern.matches("a123b"));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let pattern = KeyPattern::compile("price[usd].v2+tax?").unwrap();
        assert!(pattern.matches("price[usd].v2+tax?"));
        assert!(!pattern.matches("price[usd]Xv2+tax?"));
        assert!(!pattern.matches("priceusd.v2tax"));

        let dotted = KeyPattern::compile("a.b").unwrap();
        assert!(!dotted.matches("aXb"));
    }
}
