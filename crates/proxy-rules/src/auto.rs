//! ADBlock-style "auto proxy" rule lists.
//!
//! Each non-comment line of such a list is one rule.  A rule that matches
//! the destination means "use the proxy", unless an exception rule
//! (prefixed with `@@`) matches it too.  Supported forms:
//!
//! | rule | matches |
//! |------|---------|
//! | `/re/` | hosts that `re` matches in full |
//! | `\|https://prefix` | port 443, host starting with `prefix` |
//! | `\|http://prefix` | any other port, host starting with `prefix` |
//! | `\|\|domain`, `\|\|.domain`, `.domain`, `domain` | hosts containing `.domain` or starting with `domain` |
//! | `@@\|https://prefix`, `@@\|http://prefix`, `@@\|\|domain` | exceptions, as above |
//!
//! Lines whose first character, ignoring case, isn't `|`, `.`, a digit or
//! a letter (`!` comments and `[section]` headers, say) are skipped.

use crate::{read_lines, Result, RuleMatcher};

use regex::Regex;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Rules at or below this index are never counted towards re-sorting, and
/// every this-many counted hits the list is re-sorted.
const SORT_RULES_THRESHOLD: usize = 3;

/// How a rule decides whether it matches.
#[derive(Debug)]
enum Pattern {
    /// The whole host must match.
    Regex(Regex),
    /// Port 443 and a host starting with this.
    HttpsPrefix(String),
    /// Not port 443, and a host starting with this.
    HttpPrefix(String),
    /// Host contains this (which starts with a dot), or starts with it
    /// minus the dot.
    Domain(String),
}

impl Pattern {
    /// Return true if this pattern matches `host:port`.
    fn matches(&self, host: &str, port: u16) -> bool {
        match self {
            Pattern::Regex(re) => re.is_match(host),
            Pattern::HttpsPrefix(p) => port == 443 && host.starts_with(p.as_str()),
            Pattern::HttpPrefix(p) => port != 443 && host.starts_with(p.as_str()),
            Pattern::Domain(d) => host.contains(d.as_str()) || host.starts_with(&d[1..]),
        }
    }

    /// Build the pattern for a domain rule, making sure it starts with
    /// exactly one dot.
    fn domain(d: &str) -> Option<Self> {
        let d = d.strip_prefix('.').unwrap_or(d);
        if d.is_empty() {
            return None;
        }
        Some(Pattern::Domain(format!(".{}", d)))
    }

    /// Parse an ordinary (non-exception) rule.
    fn parse(rule: &str) -> Option<Self> {
        let first = rule.chars().next()?.to_ascii_lowercase();

        if rule.len() > 2 && first == '/' && rule.ends_with('/') {
            let body = &rule[1..rule.len() - 1];
            return match Regex::new(&format!("^(?:{})$", body)) {
                Ok(re) => Some(Pattern::Regex(re)),
                Err(e) => {
                    warn!("Ignoring bad regex rule {:?}: {}", rule, e);
                    None
                }
            };
        }

        if first != '|' && first != '.' && !first.is_ascii_digit() && !first.is_ascii_lowercase()
        {
            return None;
        }

        if let Some(p) = rule.strip_prefix("|https://") {
            return Some(Pattern::HttpsPrefix(p.to_string()));
        }
        if let Some(p) = rule.strip_prefix("|http://") {
            return Some(Pattern::HttpPrefix(p.to_string()));
        }
        Pattern::domain(rule.strip_prefix("||").unwrap_or(rule))
    }

    /// Parse an exception rule, which starts with `@@`.
    fn parse_exception(rule: &str) -> Option<Self> {
        if let Some(p) = rule.strip_prefix("@@|https://") {
            return Some(Pattern::HttpsPrefix(p.to_string()));
        }
        if let Some(p) = rule.strip_prefix("@@|http://") {
            return Some(Pattern::HttpPrefix(p.to_string()));
        }
        rule.strip_prefix("@@||").and_then(Pattern::domain)
    }
}

/// A rule, with its text and how often it has matched.
#[derive(Debug)]
struct Rule {
    /// The line this rule was parsed from.
    text: String,
    /// What it matches.
    pattern: Pattern,
    /// Number of times it has matched.
    hits: u64,
}

impl Rule {
    /// Check the rule, counting the hit if it matches.
    fn check(&mut self, host: &str, port: u16) -> bool {
        let m = self.pattern.matches(host, port);
        if m {
            self.hits += 1;
        }
        m
    }
}

/// The mutable part of an [`AutoProxyManager`].
#[derive(Debug, Default)]
struct Inner {
    /// Rules that send a destination to the proxy.
    match_rules: Vec<Rule>,
    /// Rules that override a match.
    exception_rules: Vec<Rule>,
    /// Hits on rules past [`SORT_RULES_THRESHOLD`] since creation.
    match_count: u64,
}

/// An ADBlock-style rule list.
///
/// The list keeps itself sorted so that often-matching rules are tried
/// first.
#[derive(Debug, Default)]
pub struct AutoProxyManager {
    /// Rules and counters.
    inner: Mutex<Inner>,
}

impl AutoProxyManager {
    /// Construct an empty rule list, which matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and add one rule.  Returns false if the line isn't a rule.
    pub fn add_rule(&self, rule: &str) -> bool {
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.add_rule(rule)
    }

    /// Remove the rule whose text is exactly `rule`.  Match rules are
    /// searched first, then exceptions.  Returns false if there was no such
    /// rule.
    pub fn remove_rule(&self, rule: &str) -> bool {
        let mut inner = self.inner.lock().expect("poisoned lock");
        let Inner {
            match_rules,
            exception_rules,
            ..
        } = &mut *inner;
        remove_from(match_rules, rule) || remove_from(exception_rules, rule)
    }

    /// Add every rule in `path`, returning how many lines were rules.
    ///
    /// A missing or unreadable file is logged and counts as zero rules.
    pub fn parse_file_as_rules<P: AsRef<Path>>(&self, path: P) -> usize {
        let path = path.as_ref();
        match read_lines(path) {
            Ok(lines) => {
                let mut inner = self.inner.lock().expect("poisoned lock");
                let n = lines.iter().filter(|l| inner.add_rule(l)).count();
                info!("Loaded {} proxy rules from {}", n, path.display());
                n
            }
            Err(e) => {
                warn!("Proxy rule file {} not loaded: {}", path.display(), e);
                0
            }
        }
    }

    /// Remove every rule.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.match_rules.clear();
        inner.exception_rules.clear();
    }

    /// Return the number of match rules and exception rules.
    pub fn len(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("poisoned lock");
        (inner.match_rules.len(), inner.exception_rules.len())
    }

    /// Return true if there are no rules at all.
    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}

impl Inner {
    /// Parse `rule` into whichever list it belongs to.
    fn add_rule(&mut self, rule: &str) -> bool {
        let rule = rule.trim_end();
        if let Some(pattern) = Pattern::parse(rule) {
            self.match_rules.push(Rule {
                text: rule.to_string(),
                pattern,
                hits: 0,
            });
            return true;
        }
        if let Some(pattern) = Pattern::parse_exception(rule) {
            self.exception_rules.push(Rule {
                text: rule.to_string(),
                pattern,
                hits: 0,
            });
            return true;
        }
        false
    }

    /// Find the first matching rule, then let exceptions veto it.
    fn matches(&mut self, host: &str, port: u16) -> bool {
        let idx = match self
            .match_rules
            .iter_mut()
            .position(|r| r.check(host, port))
        {
            Some(idx) => idx,
            None => return false,
        };

        if idx > SORT_RULES_THRESHOLD {
            self.match_count += 1;
            if self.match_count % SORT_RULES_THRESHOLD as u64 == 0 {
                debug!("Re-sorting {} proxy rules", self.match_rules.len());
                self.match_rules.sort_by(|a, b| b.hits.cmp(&a.hits));
            }
        }

        !self
            .exception_rules
            .iter_mut()
            .any(|r| r.check(host, port))
    }
}

impl RuleMatcher for AutoProxyManager {
    fn matches(&self, host: &str, port: u16) -> bool {
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.matches(host, port)
    }

    fn reload_from_file(&self, path: &Path) -> Result<usize> {
        let lines = read_lines(path)?;
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.match_rules.clear();
        inner.exception_rules.clear();
        let n = lines.iter().filter(|l| inner.add_rule(l)).count();
        info!("Reloaded {} proxy rules from {}", n, path.display());
        Ok(n)
    }
}

/// Remove the first rule in `rules` whose text is `text`.
fn remove_from(rules: &mut Vec<Rule>, text: &str) -> bool {
    match rules.iter().position(|r| r.text == text) {
        Some(i) => {
            rules.remove(i);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    /// A list in the usual format, header and comments included.
    const RULES: &str = "[AutoProxy 0.2.9]
! Checksum: not checked
||google.com
||gmail.com
.googleapis.com
|https://groups.google.cn
|http://translate.google.cn
@@||fonts.googleapis.com
@@|http://translate.google.cn
/^[a-z]+\\.example\\.(com|org)$/
Example.net
";

    fn manager() -> AutoProxyManager {
        let m = AutoProxyManager::new();
        for line in RULES.lines() {
            m.add_rule(line);
        }
        m
    }

    #[test]
    fn domain_rules() {
        let m = manager();
        assert!(m.matches("google.com", 80));
        assert!(m.matches("gmail.com", 80));
        assert!(m.matches("wwww.gmail.com", 80));
        assert!(!m.matches("agmail.com", 80));
        assert!(!m.matches("fonts.googleapis.com", 80));
        assert!(m.matches("googleapis.com", 80));
        assert!(m.matches("www.googleapis.com", 80));
    }

    #[test]
    fn scheme_rules() {
        let m = manager();
        assert!(!m.matches("www.translate.google.cn", 80));
        assert!(!m.matches("haha.google.cn", 80));
        // Matches |http://, then vetoed by the matching exception.
        assert!(!m.matches("translate.google.cn", 80));
        assert!(!m.matches("translate.google.cn", 443));
        assert!(m.matches("groups.google.cn", 443));
        assert!(!m.matches("groups.google.cn", 80));
    }

    #[test]
    fn regex_rules() {
        let m = manager();
        assert!(m.matches("www.example.com", 80));
        assert!(m.matches("abc.example.org", 8080));
        assert!(!m.matches("a.b.example.com", 80));
        assert!(!m.matches("www.example.net", 80));
        assert!(!m.add_rule("/(unclosed/"));
    }

    #[test]
    fn what_counts_as_a_rule() {
        let m = manager();
        assert_eq!(m.len(), (7, 2));
        assert!(!m.add_rule(""));
        assert!(!m.add_rule("! comment"));
        assert!(!m.add_rule("[Section]"));
        assert!(!m.add_rule("||"));
        assert!(m.add_rule("10.0.0.1"));
        assert!(m.add_rule("@@||example.com"));
        assert_eq!(m.len(), (8, 3));
    }

    #[test]
    fn remove_and_clear() {
        let m = manager();
        assert!(m.remove_rule("||gmail.com"));
        assert!(!m.matches("gmail.com", 80));
        assert!(!m.remove_rule("||gmail.com"));

        assert!(m.remove_rule("@@||fonts.googleapis.com"));
        assert!(m.matches("fonts.googleapis.com", 80));

        m.clear_all();
        assert!(m.is_empty());
        assert!(!m.matches("google.com", 80));
    }

    #[test]
    fn hot_rules_move_forward() {
        let m = AutoProxyManager::new();
        for r in &["a.test", "b.test", "c.test", "d.test", "e.test", "hot.test"] {
            m.add_rule(r);
        }
        for _ in 0..3 {
            assert!(m.matches("hot.test", 80));
        }
        let inner = m.inner.lock().unwrap();
        assert_eq!(inner.match_rules[0].text, "hot.test");
        assert_eq!(inner.match_count, 3);
    }

    #[test]
    fn load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gfwlist.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(RULES.replace('\n', "\r\n").as_bytes()).unwrap();
        drop(f);

        let m = AutoProxyManager::new();
        assert_eq!(m.parse_file_as_rules(&path), 9);
        assert!(m.matches("www.google.com", 443));

        m.add_rule("extra.test");
        assert_eq!(m.reload_from_file(&path).unwrap(), 9);
        assert!(!m.matches("extra.test", 80));

        assert_eq!(m.parse_file_as_rules(dir.path().join("missing")), 0);
        let e = m.reload_from_file(&dir.path().join("missing")).unwrap_err();
        assert!(e.is_not_found());
        // A failed reload keeps what was there.
        assert_eq!(m.len(), (7, 2));
    }
}
