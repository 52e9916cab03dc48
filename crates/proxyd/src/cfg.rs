//! Loading and checking proxyd's configuration.

use crate::cmdline::CmdLine;

use anyhow::{anyhow, bail, Context, Result};
use proxy_core::{UpstreamConfig, UpstreamKind};
use proxy_rules::{AutoProxyManager, Mode, ProxyRuleManager, RuleMatcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Built-in defaults, applied before any file or override.
pub(crate) const PROXYD_DEFAULTS: &str = include_str!("./proxyd_defaults.toml");

/// Which kind of server to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProxyMode {
    /// A SOCKS5 server.
    Socks,
    /// An HTTP proxy.
    Http,
}

/// Which syntax a rule file uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RuleFormat {
    /// ADBlock-style auto-proxy lists.
    Adblock,
    /// One regular expression per line.
    Regex,
}

/// Everything in a configuration file, after merging.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProxydConfig {
    /// "socks" or "http".
    mode: String,
    /// Where to listen.
    pub(crate) listen: ListenConfig,
    /// Proxy to forward through, as a URI.
    upstream: Option<String>,
    /// SOCKS5 credentials.
    auth: AuthConfig,
    /// Bypass rules.
    rules: RulesConfig,
    /// Relay buffers.
    pub(crate) buffer_pool: BufferPoolConfig,
    /// Per-address connect timeout, in seconds.
    connect_timeout_secs: Option<u64>,
    /// Default log level.
    pub(crate) log_level: String,
    /// Whether to log at trace level.
    pub(crate) trace: bool,
}

/// The `[listen]` section.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct ListenConfig {
    /// Address or name to bind.
    pub(crate) host: String,
    /// Port to bind; there is no default.
    pub(crate) port: Option<u16>,
    /// Pending connection queue length.
    pub(crate) backlog: u32,
}

/// The `[auth]` section.
#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct AuthConfig {
    /// Username clients have to send.
    username: String,
    /// Password clients have to send.
    password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The `[rules]` section.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct RulesConfig {
    /// Rule file to load, if any.
    file: Option<PathBuf>,
    /// "adblock" or "regex".
    format: String,
    /// "whitelist" or "blacklist", for regex rules.
    mode: String,
    /// Whether to reload the file when it changes.
    watch: bool,
}

/// The `[buffer_pool]` section.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct BufferPoolConfig {
    /// Largest buffer worth keeping.
    pub(crate) max_buffer_size: usize,
    /// Most buffers to keep.
    pub(crate) max_buffer_count: usize,
}

/// Load the configuration: defaults, then `files` in order, then
/// `overrides`.
pub(crate) fn load<P: AsRef<Path>, S: AsRef<str>>(
    files: &[P],
    overrides: &[S],
) -> Result<ProxydConfig> {
    let mut cfg = config::Config::new();
    cfg.merge(config::File::from_str(
        PROXYD_DEFAULTS,
        config::FileFormat::Toml,
    ))?;
    for f in files {
        let f = f.as_ref();
        cfg.merge(config::File::from(f).format(config::FileFormat::Toml))
            .with_context(|| format!("Can't read configuration from {}", f.display()))?;
    }
    let mut cmdline = CmdLine::new();
    for o in overrides {
        cmdline.push(o.as_ref());
    }
    cfg.merge(cmdline)?;

    let parsed: ProxydConfig = cfg.try_into()?;
    parsed.check()?;
    Ok(parsed)
}

impl ProxydConfig {
    /// Reject settings that can't work together.
    fn check(&self) -> Result<()> {
        self.mode()?;
        self.rule_format()?;
        self.rule_mode()?;
        if self.auth.username.is_empty() != self.auth.password.is_empty() {
            bail!("auth.username and auth.password must be set together");
        }
        if self.buffer_pool.max_buffer_size == 0 {
            bail!("buffer_pool.max_buffer_size must be positive");
        }
        Ok(())
    }

    /// Return which kind of server to run.
    pub(crate) fn mode(&self) -> Result<ProxyMode> {
        match self.mode.to_ascii_lowercase().as_str() {
            "socks" | "socks5" => Ok(ProxyMode::Socks),
            "http" => Ok(ProxyMode::Http),
            other => bail!("Unknown mode {:?}: expected \"socks\" or \"http\"", other),
        }
    }

    /// Return the rule file syntax.
    fn rule_format(&self) -> Result<RuleFormat> {
        match self.rules.format.to_ascii_lowercase().as_str() {
            "adblock" | "autoproxy" => Ok(RuleFormat::Adblock),
            "regex" => Ok(RuleFormat::Regex),
            other => bail!(
                "Unknown rules.format {:?}: expected \"adblock\" or \"regex\"",
                other
            ),
        }
    }

    /// Return the regex rule mode.
    fn rule_mode(&self) -> Result<Mode> {
        self.rules
            .mode
            .parse()
            .map_err(|e| anyhow!("Bad rules.mode {:?}: {}", self.rules.mode, e))
    }

    /// Return the port to listen on.
    pub(crate) fn port(&self) -> Result<u16> {
        match self.listen.port {
            Some(0) | None => bail!("No listen.port configured"),
            Some(p) => Ok(p),
        }
    }

    /// Return the upstream proxy, if a usable one is configured.
    ///
    /// An upstream that can't be parsed is ignored with a warning.  An HTTP
    /// upstream for a SOCKS server is an error.
    pub(crate) fn upstream(&self) -> Result<Option<UpstreamConfig>> {
        let uri = match self.upstream.as_deref() {
            None | Some("") => return Ok(None),
            Some(uri) => uri,
        };
        let up = match UpstreamConfig::from_uri(uri) {
            Ok(up) => up,
            Err(e) => {
                warn!("Ignoring upstream: {}", e);
                return Ok(None);
            }
        };
        if self.mode()? == ProxyMode::Socks && up.kind() != UpstreamKind::Socks5 {
            bail!("A SOCKS server can only chain to a socks5:// upstream, not {}", up);
        }
        Ok(Some(up))
    }

    /// Return the credentials SOCKS clients have to present, if any.
    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        if self.auth.username.is_empty() {
            None
        } else {
            Some((&self.auth.username, &self.auth.password))
        }
    }

    /// Return the per-address connect timeout, if any.
    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    /// Return the rule file to watch, if one is configured and watching
    /// is on.
    pub(crate) fn watched_rule_file(&self) -> Option<&Path> {
        match &self.rules.file {
            Some(p) if self.rules.watch => Some(p.as_path()),
            _ => None,
        }
    }

    /// Load the configured rule file, if any.
    ///
    /// A file that can't be read yields an empty rule list, so that a
    /// watcher can fill it in later.
    pub(crate) fn load_rules(&self) -> Result<Option<Arc<dyn RuleMatcher>>> {
        let path = match &self.rules.file {
            Some(p) => p,
            None => return Ok(None),
        };
        let rules: Arc<dyn RuleMatcher> = match self.rule_format()? {
            RuleFormat::Adblock => {
                let m = AutoProxyManager::new();
                m.parse_file_as_rules(path);
                Arc::new(m)
            }
            RuleFormat::Regex => {
                let m = ProxyRuleManager::new(self.rule_mode()?);
                if let Err(e) = m.add_proxy_rules_with_file(path) {
                    warn!("No rules loaded: {}", e);
                }
                Arc::new(m)
            }
        };
        Ok(Some(rules))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    /// No files.
    const NONE: &[&str] = &[];

    #[test]
    fn load_default_config() -> Result<()> {
        let cfg = load(NONE, NONE)?;
        assert_eq!(cfg.mode()?, ProxyMode::Socks);
        assert_eq!(cfg.listen.host, "0.0.0.0");
        assert_eq!(cfg.listen.backlog, 200);
        assert!(cfg.port().is_err());
        assert!(cfg.upstream()?.is_none());
        assert!(cfg.credentials().is_none());
        assert!(cfg.connect_timeout().is_none());
        assert_eq!(cfg.buffer_pool.max_buffer_size, 8192);
        assert_eq!(cfg.buffer_pool.max_buffer_count, 20);
        assert!(cfg.load_rules()?.is_none());
        Ok(())
    }

    #[test]
    fn overrides_win() -> Result<()> {
        let cfg = load(
            NONE,
            &[
                "mode=http",
                "listen.port=3128",
                "upstream=\"socks5://u:p@10.1.1.1:1080\"",
                "connect_timeout_secs=5",
            ],
        )?;
        assert_eq!(cfg.mode()?, ProxyMode::Http);
        assert_eq!(cfg.port()?, 3128);
        let up = cfg.upstream()?.unwrap();
        assert_eq!(up.host(), "10.1.1.1");
        assert_eq!(up.credentials(), Some(("u", "p")));
        assert_eq!(cfg.connect_timeout(), Some(Duration::from_secs(5)));
        Ok(())
    }

    #[test]
    fn files_then_overrides() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("proxyd.toml");
        let mut f = std::fs::File::create(&path)?;
        writeln!(f, "[listen]\nport = 1081\n[auth]\nusername = \"u\"\npassword = \"p\"")?;
        drop(f);

        let cfg = load(&[&path], NONE)?;
        assert_eq!(cfg.port()?, 1081);
        assert_eq!(cfg.credentials(), Some(("u", "p")));
        assert!(!format!("{:?}", cfg).contains("\"p\""));

        let cfg = load(&[&path], &["listen.port=1082"])?;
        assert_eq!(cfg.port()?, 1082);

        assert!(load(&[dir.path().join("missing.toml")], NONE).is_err());
        Ok(())
    }

    #[test]
    fn bad_settings() {
        assert!(load(NONE, &["mode=ftp"]).is_err());
        assert!(load(NONE, &["rules.format=yaml"]).is_err());
        assert!(load(NONE, &["rules.mode=greylist"]).is_err());
        assert!(load(NONE, &["auth.username=u"]).is_err());
        assert!(load(NONE, &["no_such_key=1"]).is_err());

        // A SOCKS server can't chain to an HTTP proxy...
        let cfg = load(NONE, &["upstream=\"http://10.1.1.1:3128\""]).unwrap();
        assert!(cfg.upstream().is_err());
        // ...but a nonsense upstream is only ignored.
        let cfg = load(NONE, &["upstream=\"gopher://x\""]).unwrap();
        assert!(cfg.upstream().unwrap().is_none());
    }

    #[test]
    fn rule_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.txt");
        std::fs::write(&path, "! comment\n||blocked.test\n@@||ok.blocked.test\n")?;
        let file = format!("rules.file={:?}", path.display().to_string());

        let cfg = load(NONE, &["mode=http", file.as_str()])?;
        let rules = cfg.load_rules()?.unwrap();
        assert!(rules.matches("www.blocked.test", 80));
        assert!(!rules.matches("ok.blocked.test", 80));
        assert!(!rules.matches("elsewhere.test", 80));
        assert_eq!(cfg.watched_rule_file(), Some(path.as_path()));

        std::fs::write(&path, "^(www\\.)?blocked\\.test$\n")?;
        let cfg = load(
            NONE,
            &["mode=http", file.as_str(), "rules.format=regex", "rules.watch=false"],
        )?;
        let rules = cfg.load_rules()?.unwrap();
        assert!(rules.matches("www.blocked.test", 443));
        assert!(!rules.matches("elsewhere.test", 443));
        assert!(cfg.watched_rule_file().is_none());
        Ok(())
    }
}
