//! The request-head parser.

use crate::{Error, Result};

use std::collections::HashMap;
use tracing::{debug, warn};

/// The line terminator HTTP/1.x uses.
const CRLF: &str = "\r\n";

/// The blank line that ends a request head.
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Methods a client may open with.
const METHODS: &[&[u8]] = &[
    b"CONNECT", b"GET", b"HEAD", b"POST", b"PUT", b"DELETE", b"OPTIONS", b"PATCH",
];

/// Port used when a request doesn't name one.
const DEFAULT_PORT: u16 = 80;

/// Find the `\r\n\r\n` that ends a request head, returning the offset of
/// its first byte.
///
/// The common case, where the buffer ends right at the blank line, is
/// checked first.
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    if data.len() < HEAD_END.len() {
        return None;
    }
    if data.ends_with(HEAD_END) {
        return Some(data.len() - HEAD_END.len());
    }
    data.windows(HEAD_END.len()).position(|w| w == HEAD_END)
}

/// Return true if `data` could be the beginning of a request.
///
/// Fewer than 7 bytes are always given the benefit of the doubt, since
/// "CONNECT" itself is 7 bytes long.
pub fn starts_with_valid_http_method(data: &[u8]) -> bool {
    if data.len() < 7 {
        return true;
    }
    METHODS.iter().any(|m| data.starts_with(m))
}

/// A parsed HTTP/1.x request head.
///
/// One parser handles one request head; construct a new one for the next.
#[derive(Clone, Debug, Default)]
pub struct HttpHeaderParser {
    /// The request method, such as `GET`.
    method: String,
    /// The request target as written.
    url: String,
    /// The protocol version, such as `HTTP/1.1`.
    version: String,
    /// Headers, keyed by lower-cased name.  A repeated header keeps its
    /// last value.
    headers: HashMap<String, String>,
    /// Length of the head, including the terminating blank line.
    head_len: usize,
}

impl HttpHeaderParser {
    /// Construct an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the request head at the start of `data`.
    ///
    /// Returns [`Error::Incomplete`] if the head isn't terminated yet; the
    /// caller should read more and try again.
    pub fn parse(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 10 {
            return Err(Error::TooShort);
        }
        let end = find_header_end(data).ok_or(Error::Incomplete)?;
        let head = String::from_utf8_lossy(&data[..end]);

        let mut lines = head.split(CRLF);
        let request_line = lines.next().unwrap_or("");
        let mut parts = request_line.split(' ');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(u), Some(v), None) => {
                self.method = m.to_string();
                self.url = u.to_string();
                self.version = v.to_string();
            }
            _ => {
                debug!("Bad HTTP request line: {:?}", request_line);
                return Err(Error::Malformed("request line"));
            }
        }

        for line in lines {
            let colon = line.find(':').ok_or_else(|| {
                debug!("Bad HTTP header line: {:?}", line);
                Error::Malformed("header line without a colon")
            })?;
            let key = line[..colon].trim().to_ascii_lowercase();
            let value = line[colon + 1..].trim().to_string();
            self.headers.insert(key, value);
        }

        self.head_len = end + HEAD_END.len();
        Ok(())
    }

    /// Return the host and port this request wants to reach.
    ///
    /// The `Host` header wins; otherwise the request target is read as an
    /// absolute URI.  A missing port means port 80.
    pub fn addr_and_port(&self) -> Result<(String, u16)> {
        if let Some(host) = self.header("host") {
            return host_and_port(host).map_err(|e| {
                warn!("Invalid Host header: {:?}", host);
                e
            });
        }
        if self.url.is_empty() {
            return Err(Error::NoTarget);
        }
        let (host, port) = uri_host_and_port(&self.url)?;
        let port = if port == 0 { DEFAULT_PORT } else { port };
        Ok((host, port))
    }

    /// Return true if this is a CONNECT request.
    pub fn is_connect_method(&self) -> bool {
        self.method == "CONNECT"
    }

    /// Return the request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Return the request target.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Return the protocol version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Return the number of bytes the head took up, blank line included.
    /// Anything after that in the buffer belongs to the request body or a
    /// tunnel.
    pub fn head_len(&self) -> usize {
        self.head_len
    }
}

/// Split a `Host` header value into host and port.
///
/// A value with two adjacent colons before the last one is a bare IPv6
/// address and gets the default port.
fn host_and_port(host: &str) -> Result<(String, u16)> {
    match host.rfind(':') {
        None => Ok((host.to_string(), DEFAULT_PORT)),
        Some(0) => Err(Error::Malformed("Host header starts with a colon")),
        Some(i) if i == host.len() - 1 => Err(Error::Malformed("Host header ends with a colon")),
        Some(i) if host.as_bytes()[i - 1] == b':' => Ok((host.to_string(), DEFAULT_PORT)),
        Some(i) => {
            let port = host[i + 1..].parse::<u16>().map_err(|_| Error::BadPort)?;
            let addr = host[..i].trim_start_matches('[').trim_end_matches(']');
            Ok((addr.to_string(), port))
        }
    }
}

/// Pull host and port out of an absolute URI such as
/// `http://user@example.com:8080/path`.  Port 0 means none was given.
fn uri_host_and_port(uri: &str) -> Result<(String, u16)> {
    let rest = match uri.find("://") {
        Some(i) => &uri[i + 3..],
        None => uri,
    };
    let authority = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    let authority = match authority.rfind('@') {
        Some(i) => &authority[i + 1..],
        None => authority,
    };

    let (host, port) = if let Some(stripped) = authority.strip_prefix('[') {
        // [v6]:port
        let close = stripped.find(']').ok_or(Error::Malformed("unterminated IPv6 literal"))?;
        let port = match stripped[close + 1..].strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => 0,
        };
        (&stripped[..close], port)
    } else {
        match authority.rfind(':') {
            Some(i) => (&authority[..i], parse_port(&authority[i + 1..])?),
            None => (authority, 0),
        }
    };

    if host.is_empty() {
        return Err(Error::NoTarget);
    }
    Ok((host.to_string(), port))
}

/// Parse a URI port; an empty port means none was given.
fn parse_port(p: &str) -> Result<u16> {
    if p.is_empty() {
        return Ok(0);
    }
    p.parse().map_err(|_| Error::BadPort)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parsed(req: &str) -> HttpHeaderParser {
        let mut p = HttpHeaderParser::new();
        p.parse(req.as_bytes()).unwrap();
        p
    }

    #[test]
    fn plain_get() {
        let req = "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let p = parsed(req);
        assert_eq!(p.method(), "GET");
        assert_eq!(p.url(), "http://example.com/");
        assert_eq!(p.version(), "HTTP/1.1");
        assert!(!p.is_connect_method());
        assert_eq!(p.addr_and_port().unwrap(), ("example.com".to_string(), 80));
        assert_eq!(p.head_len(), req.len());
    }

    #[test]
    fn connect() {
        let p = parsed("CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n");
        assert!(p.is_connect_method());
        assert_eq!(p.addr_and_port().unwrap(), ("example.com".to_string(), 443));
    }

    #[test]
    fn headers() {
        let p = parsed(
            "GET / HTTP/1.1\r\n  X-Thing :  one \r\nx-thing: two\r\nHOST:h:8080\r\n\r\nbody",
        );
        assert_eq!(p.header("X-THING"), Some("two"));
        assert_eq!(p.header("host"), Some("h:8080"));
        assert_eq!(p.addr_and_port().unwrap(), ("h".to_string(), 8080));
        assert_eq!(p.head_len(), 64);
    }

    #[test]
    fn host_forms() {
        assert_eq!(host_and_port("fe80::1").unwrap(), ("fe80::1".into(), 80));
        assert_eq!(host_and_port("[::1]:8080").unwrap(), ("::1".into(), 8080));
        assert_eq!(host_and_port("a.b").unwrap(), ("a.b".into(), 80));
        assert!(matches!(host_and_port(":80"), Err(Error::Malformed(_))));
        assert!(matches!(host_and_port("a.b:"), Err(Error::Malformed(_))));
        assert_eq!(host_and_port("a.b:http"), Err(Error::BadPort));
        assert_eq!(host_and_port("a.b:70000"), Err(Error::BadPort));
    }

    #[test]
    fn url_fallback() {
        let p = parsed("GET http://u:pw@example.org:8000/x?y HTTP/1.0\r\n\r\n");
        assert_eq!(p.addr_and_port().unwrap(), ("example.org".to_string(), 8000));
        let p = parsed("GET http://[2001:db8::1]/ HTTP/1.0\r\n\r\n");
        assert_eq!(p.addr_and_port().unwrap(), ("2001:db8::1".to_string(), 80));
        let p = parsed("GET /relative HTTP/1.0\r\n\r\n");
        assert_eq!(p.addr_and_port(), Err(Error::NoTarget));
    }

    #[test]
    fn rejections() {
        let mut p = HttpHeaderParser::new();
        assert_eq!(p.parse(b"GET / H"), Err(Error::TooShort));
        assert_eq!(p.parse(b"GET / HTTP/1.1\r\nHost: a\r\n"), Err(Error::Incomplete));
        assert!(matches!(
            p.parse(b"GET / HTTP/1.1 extra\r\n\r\n"),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            p.parse(b"GET /\r\n\r\n\r\n\r\n"),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            p.parse(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn head_end_and_methods() {
        assert_eq!(find_header_end(b"\r\n\r"), None);
        assert_eq!(find_header_end(b"a\r\n\r\n"), Some(1));
        assert_eq!(find_header_end(b"a\r\n\r\nbody"), Some(1));
        assert_eq!(find_header_end(b"a\r\nb\r\n"), None);

        assert!(starts_with_valid_http_method(b"CONN"));
        assert!(starts_with_valid_http_method(b"OPTIONS * HTTP/1.1"));
        assert!(starts_with_valid_http_method(b"PATCH /x"));
        assert!(!starts_with_valid_http_method(b"\x05\x01\x00\x01\x7f\x00\x00"));
        assert!(!starts_with_valid_http_method(b"get / HTTP/1.1"));
    }
}
