//! A SOCKS5 client, for chaining to an upstream SOCKS5 server.

use crate::connect::resolve_and_connect;
use crate::upstream::UpstreamConfig;
use crate::{Error, Result};
use proxy_rtcompat::Runtime;
use socks5_proto::{ClientState, SocksAddr, Socks5ResponseParser};

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::time::Duration;
use tracing::debug;

/// Read from `reader` into `buf` until `frame` finds a whole message at
/// the start of `buf`, and return that message's length.
///
/// Returns `Ok(None)` if the reader closes first.
pub(crate) async fn read_framed<Rd, F>(
    reader: &mut Rd,
    buf: &mut Vec<u8>,
    mut frame: F,
) -> Result<Option<usize>>
where
    Rd: AsyncRead + Unpin,
    F: FnMut(&[u8]) -> socks5_proto::Result<usize>,
{
    let mut chunk = [0_u8; 512];
    loop {
        match frame(&buf[..]) {
            Ok(n) => return Ok(Some(n)),
            Err(socks5_proto::Error::Truncated) => {}
            Err(e) => return Err(e.into()),
        }
        let n = reader.read(&mut chunk[..]).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drives the client side of a SOCKS5 handshake with an upstream server.
///
/// Once [`SocksUpstreamClient::handshake`] succeeds the stream is a plain
/// tunnel to the requested destination.
#[derive(Clone, Default)]
pub struct SocksUpstreamClient {
    /// Username and password to offer, if any.
    credentials: Option<(String, String)>,
}

impl SocksUpstreamClient {
    /// Construct a client that offers no credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a client that offers `username` and `password`.
    pub fn with_credentials<S: Into<String>>(username: S, password: S) -> Self {
        SocksUpstreamClient {
            credentials: Some((username.into(), password.into())),
        }
    }

    /// Construct a client using the credentials in `upstream`, if any.
    pub fn for_upstream(upstream: &UpstreamConfig) -> Self {
        SocksUpstreamClient {
            credentials: upstream
                .credentials()
                .map(|(u, p)| (u.to_string(), p.to_string())),
        }
    }

    /// Ask the SOCKS5 server on the other end of `stream` to connect us to
    /// `host:port`.
    ///
    /// Returns any bytes the server sent after its final reply; they
    /// belong to the destination.
    pub async fn handshake<S>(&self, stream: &mut S, host: &str, port: u16) -> Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if host.is_empty() || port == 0 {
            return Err(Error::UpstreamHandshake(socks5_proto::Error::Syntax));
        }
        let connect_msg = socks5_proto::connect_request(&SocksAddr::from_host(host), port)
            .map_err(Error::UpstreamHandshake)?;

        let mut parser = Socks5ResponseParser::new();
        let mut inbuf = Vec::new();

        send(stream, &socks5_proto::method_request(self.credentials.is_some())).await?;
        loop {
            let len = match read_framed(stream, &mut inbuf, |b| parser.message_len(b)).await {
                Ok(Some(len)) => len,
                Ok(None) => return Err(Error::UpstreamHandshake(socks5_proto::Error::Truncated)),
                Err(Error::Socks(e)) => return Err(Error::UpstreamHandshake(e)),
                Err(e) => return Err(e),
            };
            let msg: Vec<u8> = inbuf.drain(..len).collect();
            parser.parse(&msg).map_err(Error::UpstreamHandshake)?;

            match parser.state() {
                ClientState::UsernamePasswordAuth => {
                    let (u, p) = self.credentials.as_ref().ok_or(Error::UpstreamHandshake(
                        socks5_proto::Error::UnsupportedMethod(
                            socks5_proto::AuthMethod::USERNAME_PASSWORD.into(),
                        ),
                    ))?;
                    let auth = socks5_proto::auth_request(u, p).map_err(Error::UpstreamHandshake)?;
                    send(stream, &auth).await?;
                }
                ClientState::Request => send(stream, &connect_msg).await?,
                ClientState::NegotiationComplete => break,
                _ => return Err(Error::UpstreamHandshake(socks5_proto::Error::Syntax)),
            }
        }

        debug!(
            "Upstream SOCKS5 server connected us to {}:{} (bound {:?}:{})",
            host,
            port,
            parser.bound_addr(),
            parser.bound_port()
        );
        Ok(inbuf)
    }

    /// Connect to `upstream` and ask it for `host:port`.
    ///
    /// Returns the tunnel and any bytes that already came through it.
    pub async fn connect<R: Runtime>(
        &self,
        runtime: &R,
        upstream: &UpstreamConfig,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<(R::TcpStream, Vec<u8>)> {
        let mut stream =
            resolve_and_connect(runtime, upstream.host(), upstream.port(), timeout).await?;
        let extra = self.handshake(&mut stream, host, port).await?;
        Ok((stream, extra))
    }
}

/// Write one handshake message.
async fn send<S: AsyncWrite + Unpin>(stream: &mut S, msg: &[u8]) -> Result<()> {
    stream.write_all(msg).await?;
    stream.flush().await?;
    Ok(())
}
