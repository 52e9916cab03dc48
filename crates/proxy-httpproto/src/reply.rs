//! Replies the proxy writes itself, and the one header rewrite it does.

/// Sent when the client's request can't be parsed.
pub const REPLY_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nServer: hpd\r\n\r\n";

/// Sent when the proxy can't reach the requested target.
pub const REPLY_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nServer: hpd\r\n\r\n";

/// Sent once a CONNECT tunnel is established.
pub const REPLY_OK_FOR_CONNECT: &[u8] = b"HTTP/1.1 200 OK\r\nServer: hpd\r\n\r\n";

/// The hop-by-hop header that proxies rename before forwarding.
const PROXY_CONNECTION: &[u8] = b"Proxy-Connection";

/// Rename the first `Proxy-Connection` in `request` to `Connection`.
///
/// Only the first occurrence is touched; the search is case-sensitive.
pub fn rewrite_proxy_connection(request: &mut Vec<u8>) -> bool {
    let pos = match request
        .windows(PROXY_CONNECTION.len())
        .position(|w| w == PROXY_CONNECTION)
    {
        Some(pos) => pos,
        None => return false,
    };
    // "Proxy-Connection" minus "Proxy-" is "Connection".
    request.drain(pos..pos + "Proxy-".len());
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rewrite() {
        let mut r = b"GET / HTTP/1.1\r\nProxy-Connection: keep-alive\r\n\r\n".to_vec();
        assert!(rewrite_proxy_connection(&mut r));
        assert_eq!(&r[..], &b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n"[..]);

        let mut r = b"GET / HTTP/1.1\r\nproxy-connection: close\r\n\r\n".to_vec();
        assert!(!rewrite_proxy_connection(&mut r));

        let mut r = b"Proxy-Connection: a\r\nProxy-Connection: b\r\n".to_vec();
        assert!(rewrite_proxy_connection(&mut r));
        assert_eq!(&r[..], &b"Connection: a\r\nProxy-Connection: b\r\n"[..]);
    }

    #[test]
    fn replies_are_complete_heads() {
        for r in &[REPLY_BAD_REQUEST, REPLY_BAD_GATEWAY, REPLY_OK_FOR_CONNECT] {
            assert!(r.starts_with(b"HTTP/1.1 "));
            assert!(r.ends_with(b"\r\n\r\n"));
        }
    }
}
