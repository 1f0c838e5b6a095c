//! Per-destination routing decision

use crate::config::RoutingConfig;
use tracing::debug;

/// Decides whether a destination host is proxied or dialed directly.
///
/// The direct list is consulted first, then the proxy list; a host that
/// matches neither falls through to direct.
pub struct Router {
    direct_patterns: Vec<String>,
    proxy_patterns: Vec<String>,
}

impl Router {
    pub fn new(config: &RoutingConfig) -> Self {
        Router {
            direct_patterns: config.direct_domains.clone(),
            proxy_patterns: config.proxy_domains.clone(),
        }
    }

    pub fn should_proxy(&self, host: &str) -> bool {
        if match_patterns(host, &self.direct_patterns) {
            debug!("{} matched a direct rule", host);
            return false;
        }

        if match_patterns(host, &self.proxy_patterns) {
            debug!("{} matched a proxy rule", host);
            return true;
        }

        debug!("{} matched no rule, using direct", host);
        false
    }
}

fn match_patterns(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match_pattern(host, p))
}

/// A single pattern matches on exact equality, shell glob, or the
/// `*.suffix` rule (suffix itself, or any label under it).
fn match_pattern(host: &str, pattern: &str) -> bool {
    if host == pattern {
        return true;
    }

    if glob_match(host, pattern) {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        if host == suffix || host.ends_with(&format!(".{}", suffix)) {
            return true;
        }
    }

    false
}

/// Shell-style glob: `*` matches any run of characters, `?` exactly one.
fn glob_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            // Backtrack: let the last * absorb one more character
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(direct: &[&str], proxy: &[&str]) -> Router {
        Router::new(&RoutingConfig {
            direct_domains: direct.iter().map(|s| s.to_string()).collect(),
            proxy_domains: proxy.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_direct_wins_over_proxy() {
        let r = router(&["*.baidu.com"], &["*"]);
        assert!(!r.should_proxy("map.baidu.com"));
        assert!(r.should_proxy("mail.google.com"));
    }

    #[test]
    fn test_suffix_rule_matches_bare_suffix() {
        // "*.baidu.com" matches the suffix itself via the suffix rule
        let r = router(&["*.baidu.com"], &["*"]);
        assert!(!r.should_proxy("baidu.com"));
        assert!(r.should_proxy("notbaidu.com"));
    }

    #[test]
    fn test_exact_entries() {
        let r = router(&["localhost", "127.0.0.1"], &["*"]);
        assert!(!r.should_proxy("localhost"));
        assert!(!r.should_proxy("127.0.0.1"));
        assert!(r.should_proxy("example.com"));
    }

    #[test]
    fn test_default_rules_proxy_everything() {
        let r = Router::new(&RoutingConfig::default());
        assert!(r.should_proxy("example.com"));
        assert!(r.should_proxy("10.0.0.1"));
    }

    #[test]
    fn test_no_match_falls_through_to_direct() {
        let r = router(&[], &["*.google.com"]);
        assert!(r.should_proxy("mail.google.com"));
        assert!(!r.should_proxy("example.com"));
    }

    #[test]
    fn test_glob_question_mark() {
        let r = router(&["host?.example"], &["*"]);
        assert!(!r.should_proxy("host1.example"));
        assert!(r.should_proxy("host12.example"));
    }

    #[test]
    fn test_glob_match_basics() {
        assert!(glob_match("mail.google.com", "*.google.com"));
        assert!(glob_match("anything", "*"));
        assert!(glob_match("abc", "a*c"));
        assert!(glob_match("ac", "a*c"));
        assert!(!glob_match("ab", "a*c"));
        assert!(glob_match("abc", "a?c"));
        assert!(!glob_match("abbc", "a?c"));
        assert!(!glob_match("google.com", "*.google.com"));
    }
}
