//! Sessions for a SOCKS5 server.

use crate::connect::resolve_and_connect;
use crate::relay::{relay, write_pooled};
use crate::session::{while_reading, ProxySession, SessionContext, SessionFactory};
use crate::socks_client::{read_framed, SocksUpstreamClient};
use crate::upstream::{UpstreamConfig, UpstreamKind};
use crate::{Error, Result};
use proxy_rtcompat::{Runtime, StreamAddrs};
use socks5_proto::{AuthMethod, ServerState, Socks5RequestParser, SocksStatus};

use async_trait::async_trait;
use futures::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration shared by every session of a SOCKS5 server.
#[derive(Clone, Default)]
pub struct SocksSessionFactory {
    /// A SOCKS5 server to chain through, if any.
    upstream: Option<UpstreamConfig>,
    /// Username and password clients have to present, if any.
    credentials: Option<(String, String)>,
    /// Bound on each candidate connect.
    connect_timeout: Option<Duration>,
}

impl SocksSessionFactory {
    /// Construct a factory for sessions that connect directly and need no
    /// authentication.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain every session through `upstream`.
    ///
    /// Only SOCKS5 upstreams can be chained from a SOCKS5 server; an HTTP
    /// upstream is ignored with a warning.
    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        if upstream.kind() == UpstreamKind::Socks5 {
            self.upstream = Some(upstream);
        } else {
            warn!("Ignoring {}: a SOCKS server can only chain to SOCKS5", upstream);
        }
        self
    }

    /// Require clients to log in with `username` and `password`.
    pub fn with_credentials<S: Into<String>>(mut self, username: S, password: S) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Give up on each candidate address after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl<R: Runtime> SessionFactory<R> for SocksSessionFactory {
    type Session = SocksProxySession<R>;

    fn create(&self, ctx: SessionContext<R>) -> SocksProxySession<R> {
        SocksProxySession {
            ctx,
            upstream: self.upstream.clone(),
            credentials: self.credentials.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// One client of a SOCKS5 server.
pub struct SocksProxySession<R: Runtime> {
    /// The connection and what came with it.
    ctx: SessionContext<R>,
    /// See [`SocksSessionFactory::with_upstream`].
    upstream: Option<UpstreamConfig>,
    /// See [`SocksSessionFactory::with_credentials`].
    credentials: Option<(String, String)>,
    /// See [`SocksSessionFactory::with_connect_timeout`].
    connect_timeout: Option<Duration>,
}

/// Send a reply to the client.
async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, msg: &[u8]) -> Result<()> {
    writer.write_all(msg).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl<R: Runtime> ProxySession for SocksProxySession<R> {
    async fn run(self) -> Result<()> {
        let SocksProxySession {
            ctx,
            upstream,
            credentials,
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

        let required = if credentials.is_some() {
            AuthMethod::USERNAME_PASSWORD
        } else {
            AuthMethod::NO_AUTHENTICATION
        };
        let mut parser = Socks5RequestParser::with_required_method(required);
        let mut inbuf = Vec::new();

        // Handshake.
        while parser.state() != ServerState::NegotiationComplete {
            let len = match read_framed(&mut down_r, &mut inbuf, |b| parser.message_len(b)).await {
                Ok(Some(len)) => len,
                Ok(None) => {
                    debug!("Session {}: {} hung up during handshake", id, peer);
                    return Ok(());
                }
                Err(Error::Socks(e)) => {
                    warn!("Session {}: unparseable SOCKS message from {}", id, peer);
                    reply(&mut down_w, &socks5_proto::error_reply(SocksStatus::GENERAL_FAILURE))
                        .await?;
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            };
            let msg: Vec<u8> = inbuf.drain(..len).collect();

            let before = parser.state();
            let status = parser.parse(&msg);
            if status != SocksStatus::SUCCEEDED {
                debug!(
                    "Session {}: rejecting SOCKS message from {} in state {:?}: {}",
                    id, peer, before, status
                );
                reply(&mut down_w, &socks5_proto::error_reply(status)).await?;
                return Err(Error::SocksRefused(status));
            }

            match before {
                ServerState::MethodIdentification => {
                    reply(&mut down_w, &socks5_proto::method_reply(required)).await?;
                }
                ServerState::UsernamePasswordAuth => {
                    let accepted = match &credentials {
                        Some((u, p)) => parser.credentials_match(u.as_bytes(), p.as_bytes()),
                        None => false,
                    };
                    reply(&mut down_w, &socks5_proto::auth_reply(accepted)).await?;
                    if !accepted {
                        info!("Session {}: {} sent wrong credentials", id, peer);
                        return Err(Error::AuthFailed);
                    }
                    parser.credentials_accepted();
                }
                _ => {}
            }
        }

        let (host, port) = match parser.target() {
            Some(addr) => (addr.to_string(), parser.port()),
            None => {
                reply(&mut down_w, &socks5_proto::error_reply(SocksStatus::GENERAL_FAILURE)).await?;
                return Err(Error::SocksRefused(SocksStatus::GENERAL_FAILURE));
            }
        };
        debug!("Session {}: {} wants {}:{}", id, peer, host, port);

        // Anything the client sends from here on belongs to the destination.
        let mut pending = inbuf;
        let connecting = async {
            match &upstream {
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
                let status = e.socks_status();
                debug!(
                    "Session {}: couldn't reach {}:{} for {}: {}",
                    id, host, port, peer, e
                );
                reply(&mut down_w, &socks5_proto::error_reply(status)).await?;
                return Err(e);
            }
        };

        let bound = up_stream
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
        reply(&mut down_w, &socks5_proto::success_reply(bound)).await?;
        debug!("Session {}: relaying {} <-> {}:{}", id, peer, host, port);

        let (up_r, mut up_w) = up_stream.split();
        write_pooled(&pool, &mut down_w, &early).await?;
        write_pooled(&pool, &mut up_w, &pending).await?;
        let (sent, received) = relay(&pool, down_r, down_w, up_r, up_w).await?;
        debug!(
            "Session {}: closed; {} bytes up, {} bytes down",
            id, sent, received
        );
        Ok(())
    }
}
