//! Encoders for the SOCKS5 messages a proxy sends, in either role.

use crate::msg::{AddrType, AuthMethod, SocksAddr, SocksCmd, SocksStatus, AUTH_VERSION, SOCKS_VERSION};
use crate::{Error, Result};

use bytes::BufMut;
use std::convert::TryFrom;
use std::net::{IpAddr, SocketAddr};

/// Encode a method-selection request.
///
/// Without credentials we offer only "no authentication"; with them we
/// offer both that and username/password.
pub fn method_request(with_credentials: bool) -> Vec<u8> {
    let mut v = Vec::with_capacity(4);
    v.put_u8(SOCKS_VERSION);
    if with_credentials {
        v.put_u8(2);
        v.put_u8(AuthMethod::NO_AUTHENTICATION.into());
        v.put_u8(AuthMethod::USERNAME_PASSWORD.into());
    } else {
        v.put_u8(1);
        v.put_u8(AuthMethod::NO_AUTHENTICATION.into());
    }
    v
}

/// Encode an RFC 1929 username/password request.
///
/// Fails with [`Error::Syntax`] if either field is longer than 255 bytes.
pub fn auth_request(username: &str, password: &str) -> Result<Vec<u8>> {
    let ulen = u8::try_from(username.len()).map_err(|_| Error::Syntax)?;
    let plen = u8::try_from(password.len()).map_err(|_| Error::Syntax)?;
    let mut v = Vec::with_capacity(3 + username.len() + password.len());
    v.put_u8(AUTH_VERSION);
    v.put_u8(ulen);
    v.put_slice(username.as_bytes());
    v.put_u8(plen);
    v.put_slice(password.as_bytes());
    Ok(v)
}

/// Encode a CONNECT request for `addr:port`.
pub fn connect_request(addr: &SocksAddr, port: u16) -> Result<Vec<u8>> {
    let mut v = Vec::with_capacity(22);
    v.put_u8(SOCKS_VERSION);
    v.put_u8(SocksCmd::CONNECT.into());
    v.put_u8(0);
    v.put_u8(addr.addr_type().into());
    match addr {
        SocksAddr::Ip(IpAddr::V4(a)) => v.put_slice(&a.octets()),
        SocksAddr::Ip(IpAddr::V6(a)) => v.put_slice(&a.octets()),
        SocksAddr::Hostname(h) => {
            if h.is_empty() {
                return Err(Error::Syntax);
            }
            let n = u8::try_from(h.len()).map_err(|_| Error::HostnameTooLong)?;
            v.put_u8(n);
            v.put_slice(h.as_bytes());
        }
    }
    v.put_u16(port);
    Ok(v)
}

/// Encode a method-selection reply.
pub fn method_reply(method: AuthMethod) -> Vec<u8> {
    vec![SOCKS_VERSION, method.into()]
}

/// Encode an RFC 1929 verdict: `[1, 0]` on success, `[1, 1]` otherwise.
pub fn auth_reply(ok: bool) -> Vec<u8> {
    vec![AUTH_VERSION, if ok { 0 } else { 1 }]
}

/// Encode a failure reply with an all-zero IPv4 bound address.
pub fn error_reply(status: SocksStatus) -> Vec<u8> {
    let mut v = Vec::with_capacity(10);
    v.put_u8(SOCKS_VERSION);
    v.put_u8(status.into());
    v.put_u8(0);
    v.put_u8(AddrType::IPV4.into());
    v.put_slice(&[0, 0, 0, 0]);
    v.put_u16(0);
    v
}

/// Encode a success reply carrying the address we connected from.
pub fn success_reply(bound: SocketAddr) -> Vec<u8> {
    let mut v = Vec::with_capacity(22);
    v.put_u8(SOCKS_VERSION);
    v.put_u8(SocksStatus::SUCCEEDED.into());
    v.put_u8(0);
    match bound.ip() {
        IpAddr::V4(a) => {
            v.put_u8(AddrType::IPV4.into());
            v.put_slice(&a.octets());
        }
        IpAddr::V6(a) => {
            v.put_u8(AddrType::IPV6.into());
            v.put_slice(&a.octets());
        }
    }
    v.put_u16(bound.port());
    v
}
