//! Configuration for chaining to another proxy.

use crate::{Error, Result};

use std::fmt;
use std::str::FromStr;

/// What protocol an upstream proxy speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum UpstreamKind {
    /// A SOCKS5 server, reached with our own SOCKS client.
    Socks5,
    /// An HTTP proxy, to which client requests are passed through.
    Http,
}

/// An upstream proxy that sessions may forward traffic through.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// What it speaks.
    kind: UpstreamKind,
    /// Where it is.
    host: String,
    /// Which port.
    port: u16,
    /// Username and password to offer a SOCKS5 upstream.
    credentials: Option<(String, String)>,
}

impl UpstreamConfig {
    /// Describe a SOCKS5 upstream at `host:port`.
    pub fn socks5<S: Into<String>>(host: S, port: u16) -> Self {
        UpstreamConfig {
            kind: UpstreamKind::Socks5,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    /// Describe an HTTP upstream at `host:port`.
    pub fn http<S: Into<String>>(host: S, port: u16) -> Self {
        UpstreamConfig {
            kind: UpstreamKind::Http,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    /// Offer `username` and `password` to a SOCKS5 upstream.
    pub fn with_credentials<S: Into<String>>(mut self, username: S, password: S) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Parse an upstream from a URI.
    ///
    /// Accepted forms are `socks5://[user:pass@]host[:port]`,
    /// `http://host[:port]` and `https://host[:port]`.  The default ports
    /// are 1080, 80 and 443.  An `https` upstream is spoken to in plain
    /// HTTP.  IPv6 hosts go in brackets.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let bad = |problem| Error::BadUpstreamUri {
            uri: uri.to_string(),
            problem,
        };

        let sep = uri.find("://").ok_or_else(|| bad("missing scheme"))?;
        let scheme = uri[..sep].to_ascii_lowercase();
        let (kind, default_port) = match scheme.as_str() {
            "socks5" | "socks5h" => (UpstreamKind::Socks5, 1080),
            "http" => (UpstreamKind::Http, 80),
            "https" => (UpstreamKind::Http, 443),
            _ => return Err(bad("unsupported scheme")),
        };

        let rest = &uri[sep + 3..];
        let authority = rest.split('/').next().unwrap_or("");
        let (userinfo, hostport) = match authority.rfind('@') {
            Some(i) => (Some(&authority[..i]), &authority[i + 1..]),
            None => (None, authority),
        };

        let (host, port) = if let Some(v6) = hostport.strip_prefix('[') {
            let close = v6.find(']').ok_or_else(|| bad("unterminated IPv6 address"))?;
            (&v6[..close], v6[close + 1..].strip_prefix(':'))
        } else {
            match hostport.rfind(':') {
                Some(i) => (&hostport[..i], Some(&hostport[i + 1..])),
                None => (hostport, None),
            }
        };
        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = match port {
            None => default_port,
            Some(p) => p.parse::<u16>().map_err(|_| bad("invalid port"))?,
        };
        if port == 0 {
            return Err(bad("port 0"));
        }

        let credentials = match userinfo {
            None => None,
            Some(_) if kind != UpstreamKind::Socks5 => {
                return Err(bad("credentials are only supported for socks5"))
            }
            Some(info) => {
                let (u, p) = match info.find(':') {
                    Some(i) => (&info[..i], &info[i + 1..]),
                    None => (info, ""),
                };
                Some((u.to_string(), p.to_string()))
            }
        };

        Ok(UpstreamConfig {
            kind,
            host: host.to_string(),
            port,
            credentials,
        })
    }

    /// Return the protocol the upstream speaks.
    pub fn kind(&self) -> UpstreamKind {
        self.kind
    }

    /// Return the upstream's host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Return the upstream's port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the credentials to offer, if any.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }
}

impl FromStr for UpstreamConfig {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_uri(s)
    }
}

impl fmt::Display for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.kind {
            UpstreamKind::Socks5 => "socks5",
            UpstreamKind::Http => "http",
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

// Keep passwords out of logs.
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
