//! The server side of a SOCKS5 handshake: parse what a client sends us.

use crate::msg::{AddrType, AuthMethod, SocksAddr, SocksCmd, SocksStatus, SOCKS_VERSION};
use crate::reader::Reader;
use crate::{Error, Result};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// Where a [`Socks5RequestParser`] is in the handshake.
///
/// The order of the variants matters: anything past
/// [`ServerState::ParsingRequest`] is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum ServerState {
    /// Waiting for the client's list of authentication methods.
    MethodIdentification,
    /// Waiting for the client's username and password.
    UsernamePasswordAuth,
    /// Waiting for the client's CONNECT request.
    ParsingRequest,
    /// The client has told us where to connect.
    NegotiationComplete,
    /// The client sent something we couldn't accept.
    ErrorOccurred,
}

/// An incremental parser for the messages a SOCKS5 client sends.
///
/// Feed it one complete message per call to [`Socks5RequestParser::parse`];
/// use [`Socks5RequestParser::message_len`] to cut messages out of a
/// stream of bytes.  Once the state is
/// [`ServerState::NegotiationComplete`] the target address and port are
/// fixed.
///
/// When the required method is username/password, the parser stops in
/// [`ServerState::UsernamePasswordAuth`] after reading the credentials:
/// the caller checks them and then calls
/// [`Socks5RequestParser::credentials_accepted`].
#[derive(Clone, Debug)]
pub struct Socks5RequestParser {
    /// Current state.
    state: ServerState,
    /// The method a client has to offer before we talk to it.
    required_method: AuthMethod,
    /// The address type of the request, once we have one.
    addr_type: Option<AddrType>,
    /// Raw address bytes from the request (no length prefix).
    addr: Vec<u8>,
    /// Target port, in host byte order.
    port: u16,
    /// Username from the auth sub-negotiation, if it was well formed.
    username: Vec<u8>,
    /// Password from the auth sub-negotiation, if it was well formed.
    password: Vec<u8>,
}

impl Default for Socks5RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5RequestParser {
    /// Construct a parser that requires no authentication.
    pub fn new() -> Self {
        Self::with_required_method(AuthMethod::NO_AUTHENTICATION)
    }

    /// Construct a parser that requires clients to offer `method`.
    pub fn with_required_method(method: AuthMethod) -> Self {
        Socks5RequestParser {
            state: ServerState::MethodIdentification,
            required_method: method,
            addr_type: None,
            addr: Vec::new(),
            port: 0,
            username: Vec::new(),
            password: Vec::new(),
        }
    }

    /// Parse one complete message from the client.
    ///
    /// Returns [`SocksStatus::SUCCEEDED`] if the message was acceptable, or
    /// the status that should be sent back in an error reply.  Any failure
    /// except a malformed username/password message moves the parser to
    /// [`ServerState::ErrorOccurred`], where it stays.
    pub fn parse(&mut self, msg: &[u8]) -> SocksStatus {
        if self.state > ServerState::ParsingRequest {
            debug!("SOCKS message after the handshake ended ({:?})", self.state);
            return SocksStatus::GENERAL_FAILURE;
        }
        if msg.len() < 3 {
            return self.fail(SocksStatus::GENERAL_FAILURE, "SOCKS message too short");
        }
        match self.state {
            ServerState::MethodIdentification => self.identify_method(msg),
            ServerState::UsernamePasswordAuth => self.extract_credentials(msg),
            ServerState::ParsingRequest => self.parse_request(msg),
            _ => SocksStatus::GENERAL_FAILURE,
        }
    }

    /// Return the length of the next complete message at the start of
    /// `input`, given the current state.
    ///
    /// Returns [`Error::Truncated`] if `input` doesn't hold a whole message
    /// yet, and [`Error::AlreadyFinished`] if no more messages are
    /// expected.  When the message is obviously not SOCKS5 the whole input
    /// is returned so that [`Self::parse`] can reject it.
    pub fn message_len(&self, input: &[u8]) -> Result<usize> {
        let mut r = Reader::from_slice(input);
        match self.state {
            ServerState::MethodIdentification => {
                if r.take_u8()? != SOCKS_VERSION {
                    return Ok(input.len());
                }
                let n = r.take_u8()?;
                r.take(n.into())?;
            }
            ServerState::UsernamePasswordAuth => {
                let _ver = r.take_u8()?;
                let ulen = r.take_u8()?;
                r.take(ulen.into())?;
                let plen = r.take_u8()?;
                r.take(plen.into())?;
            }
            ServerState::ParsingRequest => {
                if r.take_u8()? != SOCKS_VERSION {
                    return Ok(input.len());
                }
                let _cmd = r.take_u8()?;
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

    /// Method negotiation: `[ver][nmethods][methods...]`.
    fn identify_method(&mut self, msg: &[u8]) -> SocksStatus {
        if msg[0] != SOCKS_VERSION {
            return self.fail(SocksStatus::GENERAL_FAILURE, "bad SOCKS version");
        }
        let count = usize::from(msg[1]);
        if count != msg.len() - 2 {
            return self.fail(
                SocksStatus::GENERAL_FAILURE,
                "bad method identification message",
            );
        }
        let offered = &msg[2..];
        if offered.contains(&u8::from(self.required_method)) {
            self.state = if self.required_method == AuthMethod::NO_AUTHENTICATION {
                ServerState::ParsingRequest
            } else {
                ServerState::UsernamePasswordAuth
            };
            return SocksStatus::SUCCEEDED;
        }
        if self.required_method == AuthMethod::USERNAME_PASSWORD {
            self.fail(
                SocksStatus::GENERAL_FAILURE,
                "username/password authentication is required",
            )
        } else {
            self.fail(
                SocksStatus::GENERAL_FAILURE,
                "client didn't offer the required method",
            )
        }
    }

    /// Username/password sub-negotiation: `[1][ulen][uname][plen][passwd]`.
    ///
    /// A malformed message still yields SUCCEEDED, but leaves the
    /// credentials (or part of them) empty, so the caller's comparison
    /// fails.  The state doesn't change here.
    fn extract_credentials(&mut self, msg: &[u8]) -> SocksStatus {
        // msg[0] is the sub-negotiation version; it isn't checked.
        let rest = &msg[1..];
        let ulen = usize::from(rest[0]);
        let rest = &rest[1..];
        if ulen >= rest.len() {
            return SocksStatus::SUCCEEDED;
        }
        self.username = rest[..ulen].to_vec();
        let rest = &rest[ulen..];
        let plen = usize::from(rest[0]);
        let rest = &rest[1..];
        if plen != rest.len() {
            return SocksStatus::SUCCEEDED;
        }
        self.password = rest.to_vec();
        SocksStatus::SUCCEEDED
    }

    /// The request: `[ver][cmd][rsv][atyp][addr][port]`.
    fn parse_request(&mut self, msg: &[u8]) -> SocksStatus {
        if msg.len() < 4 {
            return self.fail(SocksStatus::GENERAL_FAILURE, "SOCKS request too short");
        }
        let (version, cmd, atyp) = (msg[0], SocksCmd::from(msg[1]), AddrType::from(msg[3]));
        if version != SOCKS_VERSION {
            return self.fail(SocksStatus::GENERAL_FAILURE, "bad SOCKS version in request");
        }
        if cmd != SocksCmd::CONNECT {
            return self.fail(SocksStatus::COMMAND_NOT_SUPPORTED, "unsupported command");
        }

        let body = &msg[4..];
        let addr = match atyp {
            AddrType::IPV4 => {
                if body.len() != 4 + 2 {
                    return self.fail(SocksStatus::GENERAL_FAILURE, "bad IPv4 request length");
                }
                &body[..4]
            }
            AddrType::IPV6 => {
                if body.len() != 16 + 2 {
                    return self.fail(SocksStatus::GENERAL_FAILURE, "bad IPv6 request length");
                }
                &body[..16]
            }
            AddrType::DOMAIN_NAME => {
                let n = body.first().copied().map(usize::from).unwrap_or(0);
                if body.len() != 1 + n + 2 {
                    return self.fail(
                        SocksStatus::GENERAL_FAILURE,
                        "bad domain name request length",
                    );
                }
                &body[1..1 + n]
            }
            _ => {
                return self.fail(SocksStatus::ADDRTYPE_NOT_SUPPORTED, "unknown address type");
            }
        };
        let p = &body[body.len() - 2..];

        self.addr = addr.to_vec();
        self.port = u16::from_be_bytes([p[0], p[1]]);
        self.addr_type = Some(atyp);
        self.state = ServerState::NegotiationComplete;
        SocksStatus::SUCCEEDED
    }

    /// Enter the error state and return `status`.
    fn fail(&mut self, status: SocksStatus, why: &str) -> SocksStatus {
        debug!("Rejecting SOCKS message in state {:?}: {}", self.state, why);
        self.state = ServerState::ErrorOccurred;
        status
    }

    /// Tell the parser that the caller has checked the credentials and
    /// accepts them; the next message expected is the request.
    pub fn credentials_accepted(&mut self) {
        if self.state == ServerState::UsernamePasswordAuth {
            self.state = ServerState::ParsingRequest;
        }
    }

    /// Return true if the credentials the client sent are exactly
    /// `username` and `password`.
    pub fn credentials_match(&self, username: &[u8], password: &[u8]) -> bool {
        self.username == username && self.password == password
    }

    /// Return the current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Return the method clients must offer.
    pub fn required_method(&self) -> AuthMethod {
        self.required_method
    }

    /// Return the address type of the request, once negotiation is over.
    pub fn addr_type(&self) -> Option<AddrType> {
        self.addr_type
    }

    /// Return the raw address bytes of the request.
    pub fn addr(&self) -> &[u8] {
        &self.addr[..]
    }

    /// Return the requested port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the username the client sent, if any.
    pub fn username(&self) -> &[u8] {
        &self.username[..]
    }

    /// Return the password the client sent, if any.
    pub fn password(&self) -> &[u8] {
        &self.password[..]
    }

    /// Return the requested destination, once negotiation is over.
    ///
    /// Hostnames that aren't valid UTF-8 are converted lossily.
    pub fn target(&self) -> Option<SocksAddr> {
        let a = &self.addr;
        match self.addr_type? {
            AddrType::IPV4 if a.len() == 4 => {
                Some(SocksAddr::Ip(IpAddr::V4(Ipv4Addr::new(a[0], a[1], a[2], a[3]))))
            }
            AddrType::IPV6 if a.len() == 16 => {
                let mut octets = [0_u8; 16];
                octets.copy_from_slice(a);
                Some(SocksAddr::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            AddrType::DOMAIN_NAME => Some(SocksAddr::Hostname(
                String::from_utf8_lossy(a).into_owned(),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    fn ready_for_request() -> Socks5RequestParser {
        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("05 01 00")), SocksStatus::SUCCEEDED);
        assert_eq!(p.state(), ServerState::ParsingRequest);
        p
    }

    #[test]
    fn method_offered() {
        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("05 02 02 00")), SocksStatus::SUCCEEDED);
        assert_eq!(p.state(), ServerState::ParsingRequest);

        let mut p = Socks5RequestParser::with_required_method(AuthMethod::USERNAME_PASSWORD);
        assert_eq!(p.parse(&hex!("05 02 00 02")), SocksStatus::SUCCEEDED);
        assert_eq!(p.state(), ServerState::UsernamePasswordAuth);
    }

    #[test]
    fn method_missing_or_malformed() {
        let mut p = Socks5RequestParser::with_required_method(AuthMethod::USERNAME_PASSWORD);
        assert_eq!(p.parse(&hex!("05 01 00")), SocksStatus::GENERAL_FAILURE);
        assert_eq!(p.state(), ServerState::ErrorOccurred);

        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("05 01 02")), SocksStatus::GENERAL_FAILURE);
        assert_eq!(p.state(), ServerState::ErrorOccurred);

        // wrong version
        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("04 01 00")), SocksStatus::GENERAL_FAILURE);
        // count doesn't match length
        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("05 02 00")), SocksStatus::GENERAL_FAILURE);
        // too short to be anything
        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("05 00")), SocksStatus::GENERAL_FAILURE);
        assert_eq!(p.state(), ServerState::ErrorOccurred);
    }

    #[test]
    fn error_state_is_absorbing() {
        let mut p = Socks5RequestParser::new();
        assert_eq!(p.parse(&hex!("05 01 02")), SocksStatus::GENERAL_FAILURE);
        assert_eq!(p.parse(&hex!("05 01 00")), SocksStatus::GENERAL_FAILURE);
        assert_eq!(p.state(), ServerState::ErrorOccurred);
        assert_eq!(p.message_len(&hex!("05 01 00")), Err(Error::AlreadyFinished));
    }

    #[test]
    fn credentials() {
        let mut p = Socks5RequestParser::with_required_method(AuthMethod::USERNAME_PASSWORD);
        assert_eq!(p.parse(&hex!("05 01 02")), SocksStatus::SUCCEEDED);
        assert_eq!(p.parse(b"\x01\x01u\x01p"), SocksStatus::SUCCEEDED);
        assert_eq!(p.username(), b"u");
        assert_eq!(p.password(), b"p");
        assert!(p.credentials_match(b"u", b"p"));
        assert!(!p.credentials_match(b"u", b"q"));
        // The parser waits for the caller's verdict.
        assert_eq!(p.state(), ServerState::UsernamePasswordAuth);
        p.credentials_accepted();
        assert_eq!(p.state(), ServerState::ParsingRequest);
    }

    #[test]
    fn malformed_credentials_still_succeed() {
        let mut p = Socks5RequestParser::with_required_method(AuthMethod::USERNAME_PASSWORD);
        assert_eq!(p.parse(&hex!("05 01 02")), SocksStatus::SUCCEEDED);
        // username length runs past the end
        assert_eq!(p.parse(b"\x01\x09user"), SocksStatus::SUCCEEDED);
        assert_eq!(p.state(), ServerState::UsernamePasswordAuth);
        assert!(p.username().is_empty());
        // password length is wrong
        assert_eq!(p.parse(b"\x01\x01u\x05p"), SocksStatus::SUCCEEDED);
        assert_eq!(p.username(), b"u");
        assert!(p.password().is_empty());
        assert!(!p.credentials_match(b"u", b"p"));
    }

    #[test]
    fn request_ipv4() {
        let mut p = ready_for_request();
        assert_eq!(
            p.parse(&hex!("05 01 00 01 7f 00 00 01 00 50")),
            SocksStatus::SUCCEEDED
        );
        assert_eq!(p.state(), ServerState::NegotiationComplete);
        assert_eq!(p.addr_type(), Some(AddrType::IPV4));
        assert_eq!(p.addr(), &hex!("7f 00 00 01"));
        assert_eq!(p.port(), 80);
        assert_eq!(p.target(), Some(SocksAddr::Ip("127.0.0.1".parse().unwrap())));

        // Completed: nothing more is accepted, and nothing changes.
        assert_eq!(
            p.parse(&hex!("05 01 00 01 0a 00 00 01 00 51")),
            SocksStatus::GENERAL_FAILURE
        );
        assert_eq!(p.addr(), &hex!("7f 00 00 01"));
        assert_eq!(p.port(), 80);
        assert_eq!(p.state(), ServerState::NegotiationComplete);
    }

    #[test]
    fn request_ipv6_and_domain() {
        let mut p = ready_for_request();
        let msg = hex!("05 01 00 04 20010db8000000000000000000000001 01 bb");
        assert_eq!(p.parse(&msg), SocksStatus::SUCCEEDED);
        assert_eq!(p.addr_type(), Some(AddrType::IPV6));
        assert_eq!(p.port(), 443);
        assert_eq!(p.target(), Some(SocksAddr::Ip("2001:db8::1".parse().unwrap())));

        let mut p = ready_for_request();
        assert_eq!(
            p.parse(b"\x05\x01\x00\x03\x0bexample.com\x1f\x90"),
            SocksStatus::SUCCEEDED
        );
        assert_eq!(p.addr_type(), Some(AddrType::DOMAIN_NAME));
        assert_eq!(p.addr(), b"example.com");
        assert_eq!(p.port(), 8080);
        assert_eq!(p.target(), Some(SocksAddr::Hostname("example.com".into())));
    }

    #[test]
    fn request_lengths_off_by_one() {
        let good: [&[u8]; 3] = [
            &hex!("05 01 00 01 7f 00 00 01 00 50"),
            &hex!("05 01 00 04 20010db8000000000000000000000001 01 bb"),
            b"\x05\x01\x00\x03\x0bexample.com\x1f\x90",
        ];
        for msg in good.iter() {
            let mut short = ready_for_request();
            assert_eq!(short.parse(&msg[..msg.len() - 1]), SocksStatus::GENERAL_FAILURE);
            assert_eq!(short.state(), ServerState::ErrorOccurred);

            let mut long = ready_for_request();
            let mut m = msg.to_vec();
            m.push(0);
            assert_eq!(long.parse(&m), SocksStatus::GENERAL_FAILURE);
            assert_eq!(long.state(), ServerState::ErrorOccurred);
        }
    }

    #[test]
    fn request_rejections() {
        let mut p = ready_for_request();
        assert_eq!(
            p.parse(&hex!("05 02 00 01 7f 00 00 01 00 50")),
            SocksStatus::COMMAND_NOT_SUPPORTED
        );
        assert_eq!(p.state(), ServerState::ErrorOccurred);

        let mut p = ready_for_request();
        assert_eq!(
            p.parse(&hex!("05 01 00 07 7f 00 00 01 00 50")),
            SocksStatus::ADDRTYPE_NOT_SUPPORTED
        );

        let mut p = ready_for_request();
        assert_eq!(
            p.parse(&hex!("04 01 00 01 7f 00 00 01 00 50")),
            SocksStatus::GENERAL_FAILURE
        );
    }

    #[test]
    fn framing() {
        let p = Socks5RequestParser::new();
        assert_eq!(p.message_len(&hex!("05")), Err(Error::Truncated));
        assert_eq!(p.message_len(&hex!("05 02 00")), Err(Error::Truncated));
        assert_eq!(p.message_len(&hex!("05 02 00 02 05")), Ok(4));
        // Not SOCKS5 at all: hand everything over for rejection.
        assert_eq!(p.message_len(b"GET / HTTP/1.1"), Ok(14));

        let mut p = Socks5RequestParser::with_required_method(AuthMethod::USERNAME_PASSWORD);
        assert_eq!(p.parse(&hex!("05 01 02")), SocksStatus::SUCCEEDED);
        assert_eq!(p.message_len(b"\x01\x01u\x01"), Err(Error::Truncated));
        assert_eq!(p.message_len(b"\x01\x01u\x01p\x05"), Ok(5));
        p.parse(b"\x01\x01u\x01p");
        p.credentials_accepted();

        let msg = hex!("05 01 00 01 7f 00 00 01 00 50");
        for n in 0..msg.len() {
            assert_eq!(p.message_len(&msg[..n]), Err(Error::Truncated));
        }
        assert_eq!(p.message_len(&msg), Ok(10));
        assert_eq!(p.message_len(b"\x05\x01\x00\x03\x03abc\x00\x50extra"), Ok(10));
        assert_eq!(p.message_len(&hex!("05 01 00 09 00")), Ok(5));
    }
}
