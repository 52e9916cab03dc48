//! The client side of a SOCKS5 handshake: parse what a server sends back.

use crate::msg::{AddrType, AuthMethod, SocksAddr, SocksStatus, AUTH_VERSION, SOCKS_VERSION};
use crate::reader::Reader;
use crate::{Error, Result};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Where a [`Socks5ResponseParser`] is in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClientState {
    /// Waiting for the server to choose an authentication method.
    MethodIdentification,
    /// The server chose username/password; waiting for its verdict on the
    /// credentials we sent.
    UsernamePasswordAuth,
    /// Waiting for the server's reply to our CONNECT.
    Request,
    /// The server accepted our CONNECT; the stream is now a tunnel.
    NegotiationComplete,
    /// The server sent something we couldn't accept.
    ErrorOccurred,
}

/// An incremental parser for the replies a SOCKS5 server sends.
///
/// After each successful [`Socks5ResponseParser::parse`], the new state
/// says what to send next: credentials in
/// [`ClientState::UsernamePasswordAuth`], the CONNECT request in
/// [`ClientState::Request`], nothing at all once
/// [`ClientState::NegotiationComplete`].
#[derive(Clone, Debug)]
pub struct Socks5ResponseParser {
    /// Current state.
    state: ClientState,
    /// The method the server picked.
    method: Option<AuthMethod>,
    /// The address the server says it bound for us.
    bound_addr: Option<SocksAddr>,
    /// The port the server says it bound for us, in host byte order.
    bound_port: u16,
}

impl Default for Socks5ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5ResponseParser {
    /// Construct a parser that expects a method selection first.
    pub fn new() -> Self {
        Socks5ResponseParser {
            state: ClientState::MethodIdentification,
            method: None,
            bound_addr: None,
            bound_port: 0,
        }
    }

    /// Parse one complete reply from the server.
    ///
    /// On failure the parser moves to [`ClientState::ErrorOccurred`].
    pub fn parse(&mut self, msg: &[u8]) -> Result<()> {
        let result = match self.state {
            ClientState::MethodIdentification => self.parse_method_reply(msg),
            ClientState::UsernamePasswordAuth => self.parse_auth_reply(msg),
            ClientState::Request => self.parse_connect_reply(msg),
            ClientState::NegotiationComplete | ClientState::ErrorOccurred => {
                return Err(Error::AlreadyFinished)
            }
        };
        if result.is_err() {
            self.state = ClientState::ErrorOccurred;
        }
        result
    }

    /// Return the length of the next complete reply at the start of
    /// `input`, given the current state.
    ///
    /// Returns [`Error::Truncated`] if `input` doesn't hold a whole reply
    /// yet.  When the reply is obviously malformed the whole input is
    /// returned so that [`Self::parse`] can reject it.
    pub fn message_len(&self, input: &[u8]) -> Result<usize> {
        let mut r = Reader::from_slice(input);
        match self.state {
            ClientState::MethodIdentification | ClientState::UsernamePasswordAuth => {
                r.take(2)?;
            }
            ClientState::Request => {
                let (ver, rep) = (r.take_u8()?, r.take_u8()?);
                if ver != SOCKS_VERSION || rep != u8::from(SocksStatus::SUCCEEDED) {
                    return Ok(input.len());
                }
                let _rsv = r.take_u8()?;
                match AddrType::from(r.take_u8()?) {
                    AddrType::IPV4 => {
                        r.take(4)?;
                    }
                    AddrType::IPV6 => {
                        r.take(16)?;
                    }
                    AddrType::DOMAIN_NAME => {
                        let n = r.take_u8()?;
                        r.take(n.into())?;
                    }
                    _ => return Ok(input.len()),
                }
                r.take_u16()?;
            }
            _ => return Err(Error::AlreadyFinished),
        }
        Ok(r.consumed())
    }

    /// Method selection: `[ver][method]`.
    fn parse_method_reply(&mut self, msg: &[u8]) -> Result<()> {
        if msg.len() < 2 {
            return Err(Error::Truncated);
        }
        if msg[0] != SOCKS_VERSION {
            return Err(Error::BadProtocol(msg[0]));
        }
        let method = AuthMethod::from(msg[1]);
        self.method = Some(method);
        self.state = match method {
            AuthMethod::NO_AUTHENTICATION => ClientState::Request,
            AuthMethod::USERNAME_PASSWORD => ClientState::UsernamePasswordAuth,
            _ => return Err(Error::UnsupportedMethod(method.into())),
        };
        Ok(())
    }

    /// Authentication verdict: `[1][status]`.
    fn parse_auth_reply(&mut self, msg: &[u8]) -> Result<()> {
        if msg.len() != 2 {
            return Err(Error::Syntax);
        }
        if msg[0] != AUTH_VERSION {
            return Err(Error::BadProtocol(msg[0]));
        }
        if msg[1] != 0 {
            return Err(Error::AuthRejected(msg[1]));
        }
        self.state = ClientState::Request;
        Ok(())
    }

    /// CONNECT reply: `[ver][rep][rsv][atyp][bound addr][bound port]`.
    fn parse_connect_reply(&mut self, msg: &[u8]) -> Result<()> {
        if msg.len() < 4 {
            return Err(Error::Truncated);
        }
        if msg[0] != SOCKS_VERSION {
            return Err(Error::BadProtocol(msg[0]));
        }
        let rep = SocksStatus::from(msg[1]);
        if rep != SocksStatus::SUCCEEDED {
            return Err(Error::RequestRejected(rep));
        }

        let body = &msg[4..];
        let atyp = AddrType::from(msg[3]);
        let addr = match atyp {
            AddrType::IPV4 => {
                if body.len() != 4 + 2 {
                    return Err(Error::Syntax);
                }
                SocksAddr::Ip(IpAddr::V4(Ipv4Addr::new(
                    body[0], body[1], body[2], body[3],
                )))
            }
            AddrType::IPV6 => {
                if body.len() != 16 + 2 {
                    return Err(Error::Syntax);
                }
                let mut octets = [0_u8; 16];
                octets.copy_from_slice(&body[..16]);
                SocksAddr::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            AddrType::DOMAIN_NAME => {
                let n = body.first().copied().map(usize::from).unwrap_or(0);
                if body.len() != 1 + n + 2 {
                    return Err(Error::Syntax);
                }
                SocksAddr::Hostname(String::from_utf8_lossy(&body[1..1 + n]).into_owned())
            }
            _ => return Err(Error::AddressTypeNotSupported(atyp.into())),
        };
        let p = &body[body.len() - 2..];

        self.bound_addr = Some(addr);
        self.bound_port = u16::from_be_bytes([p[0], p[1]]);
        self.state = ClientState::NegotiationComplete;
        Ok(())
    }

    /// Return the current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Return the method the server chose, if it has chosen one.
    pub fn method(&self) -> Option<AuthMethod> {
        self.method
    }

    /// Return the address the server reported binding.
    pub fn bound_addr(&self) -> Option<&SocksAddr> {
        self.bound_addr.as_ref()
    }

    /// Return the port the server reported binding.
    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn no_auth_path() {
        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 00")).unwrap();
        assert_eq!(p.state(), ClientState::Request);
        assert_eq!(p.method(), Some(AuthMethod::NO_AUTHENTICATION));

        p.parse(&hex!("05 00 00 01 c0 00 02 01 1f 90")).unwrap();
        assert_eq!(p.state(), ClientState::NegotiationComplete);
        assert_eq!(
            p.bound_addr(),
            Some(&SocksAddr::Ip("192.0.2.1".parse().unwrap()))
        );
        assert_eq!(p.bound_port(), 8080);
        assert_eq!(p.parse(&hex!("05 00")), Err(Error::AlreadyFinished));
    }

    #[test]
    fn auth_path() {
        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 02")).unwrap();
        assert_eq!(p.state(), ClientState::UsernamePasswordAuth);
        p.parse(&hex!("01 00")).unwrap();
        assert_eq!(p.state(), ClientState::Request);
        p.parse(b"\x05\x00\x00\x03\x04host\x00\x50").unwrap();
        assert_eq!(p.bound_addr(), Some(&SocksAddr::Hostname("host".into())));
        assert_eq!(p.bound_port(), 80);
    }

    #[test]
    fn failures() {
        let mut p = Socks5ResponseParser::new();
        assert_eq!(p.parse(&hex!("05 ff")), Err(Error::UnsupportedMethod(0xff)));
        assert_eq!(p.state(), ClientState::ErrorOccurred);

        let mut p = Socks5ResponseParser::new();
        assert_eq!(p.parse(&hex!("04 00")), Err(Error::BadProtocol(4)));

        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 02")).unwrap();
        assert_eq!(p.parse(&hex!("01 01")), Err(Error::AuthRejected(1)));

        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 02")).unwrap();
        assert_eq!(p.parse(&hex!("01 00 00")), Err(Error::Syntax));

        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 00")).unwrap();
        assert_eq!(
            p.parse(&hex!("05 05 00 01 00 00 00 00 00 00")),
            Err(Error::RequestRejected(SocksStatus::CONNECTION_REFUSED))
        );

        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 00")).unwrap();
        assert_eq!(
            p.parse(&hex!("05 00 00 01 00 00 00 00 00")),
            Err(Error::Syntax)
        );
    }

    #[test]
    fn ipv6_reply() {
        let mut p = Socks5ResponseParser::new();
        p.parse(&hex!("05 00")).unwrap();
        p.parse(&hex!("05 00 00 04 20010db8000000000000000000000002 00 16"))
            .unwrap();
        assert_eq!(
            p.bound_addr(),
            Some(&SocksAddr::Ip("2001:db8::2".parse().unwrap()))
        );
        assert_eq!(p.bound_port(), 22);
    }

    #[test]
    fn framing() {
        let mut p = Socks5ResponseParser::new();
        assert_eq!(p.message_len(&hex!("05")), Err(Error::Truncated));
        assert_eq!(p.message_len(&hex!("05 00 05 00")), Ok(2));
        p.parse(&hex!("05 00")).unwrap();

        let reply = hex!("05 00 00 01 c0 00 02 01 1f 90");
        for n in 0..reply.len() {
            assert_eq!(p.message_len(&reply[..n]), Err(Error::Truncated));
        }
        assert_eq!(p.message_len(&reply), Ok(10));
        // A refusal is framed as whatever we have, and rejected by parse.
        assert_eq!(p.message_len(&hex!("05 04 00")), Ok(3));
    }
}
