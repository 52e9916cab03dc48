//! White-lists and black-lists of host regexes.

use crate::{read_lines, Error, Result, RuleMatcher};

use regex::Regex;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;
use tracing::{info, warn};

/// What a proxy rule match means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Mode {
    /// Only hosts that match a proxy rule go through the upstream.
    WhiteList,
    /// Every host goes through the upstream except those that match a
    /// proxy rule.
    BlackList,
}

impl FromStr for Mode {
    type Err = &'static str;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whitelist" | "white-list" | "white_list" => Ok(Mode::WhiteList),
            "blacklist" | "black-list" | "black_list" => Ok(Mode::BlackList),
            _ => Err("expected \"whitelist\" or \"blacklist\""),
        }
    }
}

/// A compiled rule and the text it came from.
#[derive(Debug)]
struct RegexRule {
    /// The rule as written.
    text: String,
    /// The rule anchored at both ends.
    re: Regex,
}

impl RegexRule {
    /// Compile `text` so that it has to match a whole host.
    fn new(text: &str) -> Result<Self> {
        let re = Regex::new(&format!("^(?:{})$", text)).map_err(|source| Error::BadRegex {
            rule: text.to_string(),
            source,
        })?;
        Ok(RegexRule {
            text: text.to_string(),
            re,
        })
    }
}

/// Everything a [`ProxyRuleManager`] guards.
#[derive(Debug)]
struct Lists {
    /// Current mode.
    mode: Mode,
    /// Rules whose meaning depends on the mode.
    proxy_rules: Vec<RegexRule>,
    /// Rules that force a direct connection, whatever the mode.
    ignore_rules: Vec<RegexRule>,
}

/// Which of the two lists an operation applies to.
#[derive(Clone, Copy, Debug)]
enum Which {
    /// The proxy rules.
    Proxy,
    /// The ignore rules.
    Ignore,
}

impl Which {
    /// Return a name for log messages.
    fn name(self) -> &'static str {
        match self {
            Which::Proxy => "proxy",
            Which::Ignore => "ignore",
        }
    }
}

impl Lists {
    /// Return the list `which` names.
    fn list(&mut self, which: Which) -> &mut Vec<RegexRule> {
        match which {
            Which::Proxy => &mut self.proxy_rules,
            Which::Ignore => &mut self.ignore_rules,
        }
    }
}

/// A set of host regexes deciding which destinations use the upstream.
///
/// Ignore rules are checked first and always mean "connect directly".
/// Then, in [`Mode::WhiteList`], a host matching a proxy rule is
/// forwarded and all others aren't; [`Mode::BlackList`] is the reverse.
/// Rules must match the whole host.
#[derive(Debug)]
pub struct ProxyRuleManager {
    /// The rules.
    lists: RwLock<Lists>,
}

impl ProxyRuleManager {
    /// Construct an empty manager in `mode`.
    pub fn new(mode: Mode) -> Self {
        ProxyRuleManager {
            lists: RwLock::new(Lists {
                mode,
                proxy_rules: Vec::new(),
                ignore_rules: Vec::new(),
            }),
        }
    }

    /// Add one proxy rule.
    pub fn add_proxy_rule(&self, rule: &str) -> Result<()> {
        self.add(Which::Proxy, rule)
    }

    /// Add one ignore rule.
    pub fn add_ignore_rule(&self, rule: &str) -> Result<()> {
        self.add(Which::Ignore, rule)
    }

    /// Remove the proxy rule written exactly as `rule`.
    pub fn remove_proxy_rule(&self, rule: &str) -> bool {
        self.remove(Which::Proxy, rule)
    }

    /// Remove the ignore rule written exactly as `rule`.
    pub fn remove_ignore_rule(&self, rule: &str) -> bool {
        self.remove(Which::Ignore, rule)
    }

    /// Add a proxy rule for every non-empty line of `rules`.
    pub fn add_proxy_rules_with_string(&self, rules: &str) -> usize {
        let n = self.add_lines(Which::Proxy, rules.lines());
        info!("Loaded {} proxy rules from string", n);
        n
    }

    /// Add an ignore rule for every non-empty line of `rules`.
    pub fn add_ignore_rules_with_string(&self, rules: &str) -> usize {
        let n = self.add_lines(Which::Ignore, rules.lines());
        info!("Loaded {} ignore rules from string", n);
        n
    }

    /// Add a proxy rule for every non-empty line of the file at `path`.
    pub fn add_proxy_rules_with_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        self.add_file(Which::Proxy, path.as_ref())
    }

    /// Add an ignore rule for every non-empty line of the file at `path`.
    pub fn add_ignore_rules_with_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        self.add_file(Which::Ignore, path.as_ref())
    }

    /// Return true if traffic to `host` should use the upstream proxy.
    pub fn should_forward_to_upstream(&self, host: &str) -> bool {
        let lists = self.lists.read().expect("poisoned lock");
        if lists.ignore_rules.iter().any(|r| r.re.is_match(host)) {
            return false;
        }
        let white = lists.mode == Mode::WhiteList;
        if lists.proxy_rules.iter().any(|r| r.re.is_match(host)) {
            return white;
        }
        !white
    }

    /// Return the current mode.
    pub fn mode(&self) -> Mode {
        self.lists.read().expect("poisoned lock").mode
    }

    /// Change the mode, keeping the rules.
    pub fn set_mode(&self, mode: Mode) {
        self.lists.write().expect("poisoned lock").mode = mode;
    }

    /// Compile `rule` and append it to `which`.
    fn add(&self, which: Which, rule: &str) -> Result<()> {
        let rule = RegexRule::new(rule)?;
        self.lists.write().expect("poisoned lock").list(which).push(rule);
        Ok(())
    }

    /// Remove the first rule in `which` written as `rule`.
    fn remove(&self, which: Which, rule: &str) -> bool {
        let mut lists = self.lists.write().expect("poisoned lock");
        let list = lists.list(which);
        match list.iter().position(|r| r.text == rule) {
            Some(i) => {
                list.remove(i);
                true
            }
            None => false,
        }
    }

    /// Add each non-empty line to `which`, skipping (and logging) lines
    /// that don't compile.
    fn add_lines<'a, I>(&self, which: Which, lines: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let compiled: Vec<RegexRule> = lines
            .into_iter()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .filter_map(|l| match RegexRule::new(l) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Skipping {} rule: {}", which.name(), e);
                    None
                }
            })
            .collect();
        let n = compiled.len();
        self.lists
            .write()
            .expect("poisoned lock")
            .list(which)
            .extend(compiled);
        n
    }

    /// Load a file of rules into `which`.
    fn add_file(&self, which: Which, path: &Path) -> Result<usize> {
        let lines = read_lines(path)?;
        let n = self.add_lines(which, lines.iter().map(String::as_str));
        info!("Loaded {} {} rules from file: {}", n, which.name(), path.display());
        Ok(n)
    }
}

impl RuleMatcher for ProxyRuleManager {
    fn matches(&self, host: &str, _port: u16) -> bool {
        self.should_forward_to_upstream(host)
    }

    /// Replaces the proxy rules; ignore rules are kept.
    fn reload_from_file(&self, path: &Path) -> Result<usize> {
        let lines = read_lines(path)?;
        self.lists
            .write()
            .expect("poisoned lock")
            .proxy_rules
            .clear();
        let n = self.add_lines(Which::Proxy, lines.iter().map(String::as_str));
        info!("Reloaded {} proxy rules from file: {}", n, path.display());
        Ok(n)
    }
}
