//! Resolve a destination and connect to the first address that answers.

use crate::{Error, Result};
use proxy_rtcompat::{Runtime, SleepProviderExt};

use retry_error::RetryError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, warn};

/// Return the candidate addresses for `host`.
///
/// A literal IP address is its own single candidate; anything else is
/// looked up, and the resolver's order is kept.  An empty answer counts as
/// a failure.
pub async fn resolve_target<R: Runtime>(runtime: &R, host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    debug!("Resolving address: {}", host);
    match runtime.resolve(host).await {
        Ok(addrs) if addrs.is_empty() => {
            warn!("{} resolved to zero addresses", host);
            Err(Error::Resolve {
                host: host.to_string(),
                source: None,
            })
        }
        Ok(addrs) => Ok(addrs),
        Err(e) => {
            warn!("Failed to resolve {}: {}", host, e);
            Err(Error::Resolve {
                host: host.to_string(),
                source: Some(e),
            })
        }
    }
}

/// Connect to `port` on each address in `addrs` in turn, returning the
/// first stream that connects.
///
/// Each attempt is bounded by `timeout`, if one is given; a timeout counts
/// as that address's failure.  If every address fails, the error records
/// all of the failures in order.
pub async fn connect_any<R: Runtime>(
    runtime: &R,
    addrs: &[IpAddr],
    port: u16,
    timeout: Option<Duration>,
) -> Result<R::TcpStream> {
    let target = match addrs.first() {
        Some(a) => SocketAddr::new(*a, port).to_string(),
        None => format!(":{}", port),
    };
    let mut errors = RetryError::in_attempt_to(format!("connect to {}", target));

    for (n, ip) in addrs.iter().enumerate() {
        let addr = SocketAddr::new(*ip, port);
        let attempt = match timeout {
            Some(t) => match runtime.timeout(t, runtime.connect(&addr)).await {
                Ok(r) => r,
                Err(e) => Err(e.into()),
            },
            None => runtime.connect(&addr).await,
        };
        match attempt {
            Ok(stream) => {
                debug!("Connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                let more = n + 1 < addrs.len();
                debug!(
                    "Failed to connect to {}: {}{}",
                    addr,
                    e,
                    if more { "; trying next address" } else { "" }
                );
                errors.push(e);
            }
        }
    }

    Err(Error::ConnectFailed {
        target,
        attempts: errors,
    })
}

/// Resolve `host` and connect to it.
pub(crate) async fn resolve_and_connect<R: Runtime>(
    runtime: &R,
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<R::TcpStream> {
    let addrs = resolve_target(runtime, host).await?;
    connect_any(runtime, &addrs, port, timeout).await
}

#[cfg(test)]
mod test {
    use super::*;
    use proxy_rtcompat::{test_with_runtime, TcpListener, TcpProvider};
    use proxy_rtmock::dns::MockDns;
    use proxy_rtmock::net::MockNetwork;
    use std::io::ErrorKind;

    #[test]
    fn literal_skips_dns() {
        test_with_runtime(|rt| async move {
            let net = MockNetwork::new();
            let dns = MockDns::new();
            let rt = net
                .builder()
                .add_address("10.0.0.1".parse().unwrap())
                .runtime(rt)
                .with_dns(dns.clone());
            assert_eq!(
                resolve_target(&rt, "192.0.2.9").await.unwrap(),
                vec!["192.0.2.9".parse::<IpAddr>().unwrap()]
            );
            assert_eq!(
                resolve_target(&rt, "2001:db8::1").await.unwrap(),
                vec!["2001:db8::1".parse::<IpAddr>().unwrap()]
            );
            assert!(dns.lookups().is_empty());
        });
    }

    #[test]
    fn resolve_failures() {
        test_with_runtime(|rt| async move {
            let net = MockNetwork::new();
            let dns = MockDns::new();
            dns.add_host("empty.test", vec![]);
            dns.fail_host("broken.test", ErrorKind::Other);
            let rt = net
                .builder()
                .add_address("10.0.0.1".parse().unwrap())
                .runtime(rt)
                .with_dns(dns.clone());

            let e = resolve_target(&rt, "empty.test").await.unwrap_err();
            assert!(matches!(e, Error::Resolve { source: None, .. }));
            let e = resolve_target(&rt, "broken.test").await.unwrap_err();
            assert!(matches!(e, Error::Resolve { source: Some(_), .. }));
            let e = resolve_target(&rt, "unknown.test").await.unwrap_err();
            assert_eq!(e.socks_status(), socks5_proto::SocksStatus::HOST_UNREACHABLE);
        });
    }

    #[test]
    fn failover_in_order() {
        test_with_runtime(|rt| async move {
            let net = MockNetwork::new();
            let client = net
                .builder()
                .add_address("10.0.0.1".parse().unwrap())
                .runtime(rt.clone());
            let server = net
                .builder()
                .add_address("192.0.2.3".parse().unwrap())
                .provider();
            let target: SocketAddr = "192.0.2.3:80".parse().unwrap();
            let listener = server.listen(&target, 10).await.unwrap();

            let addrs: Vec<IpAddr> = vec![
                "192.0.2.1".parse().unwrap(),
                "192.0.2.2".parse().unwrap(),
                "192.0.2.3".parse().unwrap(),
            ];
            let stream = connect_any(&client, &addrs, 80, None).await;
            assert!(stream.is_ok());
            let (_conn, peer) = listener.accept().await.unwrap();
            assert_eq!(peer.ip(), "10.0.0.1".parse::<IpAddr>().unwrap());

            let attempts = net.connect_attempts();
            assert_eq!(
                attempts,
                addrs
                    .iter()
                    .map(|ip| SocketAddr::new(*ip, 80))
                    .collect::<Vec<_>>()
            );
        });
    }

    #[test]
    fn all_fail() {
        test_with_runtime(|rt| async move {
            let net = MockNetwork::new();
            let client = net
                .builder()
                .add_address("10.0.0.1".parse().unwrap())
                .runtime(rt.clone());
            net.fail_connections_to("192.0.2.2:443".parse().unwrap(), ErrorKind::TimedOut);
            net.blackhole("192.0.2.3:443".parse().unwrap());

            let addrs: Vec<IpAddr> = vec![
                "192.0.2.1".parse().unwrap(),
                "192.0.2.2".parse().unwrap(),
                "192.0.2.3".parse().unwrap(),
            ];
            let e = connect_any(&client, &addrs, 443, Some(Duration::from_millis(50)))
                .await
                .unwrap_err();
            match &e {
                Error::ConnectFailed { attempts, target } => {
                    assert_eq!(target, "192.0.2.1:443");
                    assert_eq!(attempts.len(), 3);
                    let kinds: Vec<_> = attempts.sources().map(|e| e.kind()).collect();
                    assert_eq!(
                        kinds,
                        vec![
                            ErrorKind::ConnectionRefused,
                            ErrorKind::TimedOut,
                            ErrorKind::TimedOut
                        ]
                    );
                }
                other => panic!("unexpected error {:?}", other),
            }
            assert_eq!(e.socks_status(), socks5_proto::SocksStatus::TTL_EXPIRED);
            assert_eq!(net.connect_attempts().len(), 3);
        });
    }
}
