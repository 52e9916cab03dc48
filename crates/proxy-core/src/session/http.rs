//! Sessions for an HTTP proxy server.

use crate::connect::resolve_and_connect;
use crate::relay::{relay, write_pooled};
use crate::session::{while_reading, ProxySession, SessionContext, SessionFactory};
use crate::socks_client::SocksUpstreamClient;
use crate::upstream::{UpstreamConfig, UpstreamKind};
use crate::{Error, Result};
use proxy_httpproto::{
    find_header_end, rewrite_proxy_connection, starts_with_valid_http_method, HttpHeaderParser,
    REPLY_BAD_GATEWAY, REPLY_BAD_REQUEST, REPLY_OK_FOR_CONNECT,
};
use proxy_rtcompat::Runtime;
use proxy_rules::RuleMatcher;

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest request head we'll wait for.
const MAX_HEAD_LEN: usize = 64 * 1024;

/// Configuration shared by every session of an HTTP proxy server.
#[derive(Clone, Default)]
pub struct HttpSessionFactory {
    /// A proxy to forward through, if any.
    upstream: Option<UpstreamConfig>,
    /// Decides which targets go through `upstream`.
    rules: Option<Arc<dyn RuleMatcher>>,
    /// Bound on each candidate connect.
    connect_timeout: Option<Duration>,
}

impl HttpSessionFactory {
    /// Construct a factory for sessions that connect directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward requests through `upstream`.
    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Only forward through the upstream when `rules` match the target.
    ///
    /// Without rules, everything goes through the upstream.
    pub fn with_rules(mut self, rules: Arc<dyn RuleMatcher>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Give up on each candidate address after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl<R: Runtime> SessionFactory<R> for HttpSessionFactory {
    type Session = HttpProxySession<R>;

    fn create(&self, ctx: SessionContext<R>) -> HttpProxySession<R> {
        HttpProxySession {
            ctx,
            upstream: self.upstream.clone(),
            rules: self.rules.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// One client of an HTTP proxy server.
///
/// A `CONNECT` request becomes a tunnel; any other request is sent on to
/// the target (or the upstream proxy) as-is, and from then on the
/// connection is relayed without looking at it again.
pub struct HttpProxySession<R: Runtime> {
    /// The connection and what came with it.
    ctx: SessionContext<R>,
    /// See [`HttpSessionFactory::with_upstream`].
    upstream: Option<UpstreamConfig>,
    /// See [`HttpSessionFactory::with_rules`].
    rules: Option<Arc<dyn RuleMatcher>>,
    /// See [`HttpSessionFactory::with_connect_timeout`].
    connect_timeout: Option<Duration>,
}

/// Read from `reader` until `buf` holds a whole request head.
///
/// Returns `Ok(false)` if the client hangs up first, and an error if what
/// it's sending can't be an HTTP request.
async fn read_head<Rd: AsyncRead + Unpin>(reader: &mut Rd, buf: &mut Vec<u8>) -> Result<bool> {
    let mut chunk = [0_u8; 1024];
    loop {
        if !starts_with_valid_http_method(buf) {
            return Err(proxy_httpproto::Error::Malformed("unknown method").into());
        }
        if find_header_end(buf).is_some() {
            return Ok(true);
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(proxy_httpproto::Error::Malformed("request head too long").into());
        }
        let n = reader.read(&mut chunk[..]).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Send a canned reply to the client.
async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, msg: &[u8]) -> Result<()> {
    writer.write_all(msg).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl<R: Runtime> ProxySession for HttpProxySession<R> {
    async fn run(self) -> Result<()> {
        let HttpProxySession {
            ctx,
            upstream,
            rules,
            connect_timeout,
        } = self;
        let SessionContext {
            id,
            runtime,
            stream,
            peer,
            pool,
        } = ctx;
        let (mut down_r, mut down_w) = stream.split();

        let mut inbuf = Vec::new();
        let target = match read_head(&mut down_r, &mut inbuf).await {
            Ok(false) => {
                debug!("Session {}: {} hung up before finishing its request", id, peer);
                return Ok(());
            }
            Ok(true) => {
                let mut parser = HttpHeaderParser::new();
                match parser.parse(&inbuf).and_then(|()| parser.addr_and_port()) {
                    Ok((host, port)) => Ok((host, port, parser)),
                    Err(e) => Err(e),
                }
            }
            Err(Error::Http(e)) => Err(e),
            Err(e) => return Err(e),
        };
        let (host, port, parser) = match target {
            Ok(t) => t,
            Err(e) => {
                warn!("Session {}: bad HTTP request from {}: {}", id, peer, e);
                reply(&mut down_w, REPLY_BAD_REQUEST).await?;
                return Err(e.into());
            }
        };
        let is_connect = parser.is_connect_method();
        debug!(
            "Session {}: {} {} {}:{}",
            id,
            peer,
            parser.method(),
            host,
            port
        );

        let via = match &upstream {
            Some(up) if rules.as_ref().map_or(true, |r| r.matches(&host, port)) => Some(up),
            Some(_) => {
                debug!("Session {}: {}:{} bypasses the upstream", id, host, port);
                None
            }
            None => None,
        };

        // What to send the far end once it's connected.  For a tunnel we
        // answer the client ourselves instead, and whatever followed the
        // head is tunnel data.
        let (mut request, mut pending) = match via {
            Some(up) if up.kind() == UpstreamKind::Http => (inbuf, Vec::new()),
            _ if is_connect => (Vec::new(), inbuf.split_off(parser.head_len())),
            _ => (inbuf, Vec::new()),
        };

        let connecting = async {
            match via {
                Some(up) if up.kind() == UpstreamKind::Http => {
                    resolve_and_connect(&runtime, up.host(), up.port(), connect_timeout)
                        .await
                        .map(|s| (s, Vec::new()))
                }
                Some(up) => {
                    SocksUpstreamClient::for_upstream(up)
                        .connect(&runtime, up, &host, port, connect_timeout)
                        .await
                }
                None => resolve_and_connect(&runtime, &host, port, connect_timeout)
                    .await
                    .map(|s| (s, Vec::new())),
            }
        };
        let (up_stream, early) = match while_reading(&mut down_r, &mut pending, connecting).await {
            None => {
                debug!("Session {}: {} hung up while we were connecting", id, peer);
                return Ok(());
            }
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                debug!(
                    "Session {}: couldn't reach {}:{} for {}: {}",
                    id, host, port, peer, e
                );
                reply(&mut down_w, REPLY_BAD_GATEWAY).await?;
                return Err(e);
            }
        };

        let (up_r, mut up_w) = up_stream.split();
        if request.is_empty() {
            reply(&mut down_w, REPLY_OK_FOR_CONNECT).await?;
        } else {
            rewrite_proxy_connection(&mut request);
            write_pooled(&pool, &mut up_w, &request).await?;
        }
        write_pooled(&pool, &mut down_w, &early).await?;
        write_pooled(&pool, &mut up_w, &pending).await?;

        debug!("Session {}: relaying {} <-> {}:{}", id, peer, host, port);
        let (sent, received) = relay(&pool, down_r, down_w, up_r, up_w).await?;
        debug!(
            "Session {}: closed; {} bytes up, {} bytes down",
            id, sent, received
        );
        Ok(())
    }
}
