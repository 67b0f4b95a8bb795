//! VLESS handshake parsing and serialization.
//!
//! This module provides a zero-copy parser for the VLESS request handshake:
//! the first binary message on a tunnel connection, carrying the protocol
//! version, a 16-byte credential, the destination address, and any payload
//! the client wants forwarded before steady-state relay begins.

use std::fmt::Write as _;
use std::str::FromStr;

use bytes::BytesMut;

/// Length of the client credential in bytes (a UUID).
pub const CREDENTIAL_LEN: usize = 16;
/// Minimum handshake length: version + credential + addon-length byte.
pub const MIN_HANDSHAKE_BYTES: usize = 1 + CREDENTIAL_LEN + 1;
/// Length of the success acknowledgment written back to the client.
pub const ACK_LEN: usize = 2;

/// TCP forwarding command. The command byte is carried for offset
/// correctness but does not affect the forwarding decision.
pub const CMD_TCP: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x02;
pub const ATYP_IPV6: u8 = 0x03;

/// Maximum domain name length (bounded by the one-byte length prefix).
pub const MAX_DOMAIN_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer ends before the handshake does; carries the **minimum total
    /// bytes** the buffer would need for the failing step.
    Truncated(usize),
    /// Address type selector outside {1, 2, 3}.
    InvalidAtyp(u8),
    /// Domain bytes are not valid UTF-8.
    InvalidDomainUtf8,
}

/// Errors that can occur when writing a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Domain name exceeds the 255-byte length prefix.
    DomainTooLong,
}

/// Destination address as encoded in the handshake.
///
/// Each variant owns its own decode with explicit bounds checks, so a short
/// buffer is a [`ParseError::Truncated`] result rather than a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atyp {
    Ipv4,
    Domain,
    Ipv6,
}

impl Atyp {
    #[inline]
    pub fn from_byte(b: u8) -> Result<Self, ParseError> {
        match b {
            ATYP_IPV4 => Ok(Atyp::Ipv4),
            ATYP_DOMAIN => Ok(Atyp::Domain),
            ATYP_IPV6 => Ok(Atyp::Ipv6),
            other => Err(ParseError::InvalidAtyp(other)),
        }
    }

    #[inline]
    pub fn byte(self) -> u8 {
        match self {
            Atyp::Ipv4 => ATYP_IPV4,
            Atyp::Domain => ATYP_DOMAIN,
            Atyp::Ipv6 => ATYP_IPV6,
        }
    }

    /// Decode the address bytes for this type, returning the host and the
    /// number of bytes consumed. `Truncated` lengths are relative to `buf`.
    pub fn decode(self, buf: &[u8]) -> Result<(HostRef<'_>, usize), ParseError> {
        match self {
            Atyp::Ipv4 => {
                need(buf, 4)?;
                Ok((HostRef::Ipv4([buf[0], buf[1], buf[2], buf[3]]), 4))
            }
            Atyp::Domain => {
                need(buf, 1)?;
                let len = buf[0] as usize;
                need(buf, 1 + len)?;
                let domain = std::str::from_utf8(&buf[1..1 + len])
                    .map_err(|_| ParseError::InvalidDomainUtf8)?;
                Ok((HostRef::Domain(domain), 1 + len))
            }
            Atyp::Ipv6 => {
                need(buf, 16)?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                Ok((HostRef::Ipv6(ip), 16))
            }
        }
    }
}

/// Borrowed destination host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRef<'a> {
    Ipv4([u8; 4]),
    Domain(&'a str),
    Ipv6([u8; 16]),
}

impl HostRef<'_> {
    #[inline]
    pub fn atyp(&self) -> Atyp {
        match self {
            HostRef::Ipv4(_) => Atyp::Ipv4,
            HostRef::Domain(_) => Atyp::Domain,
            HostRef::Ipv6(_) => Atyp::Ipv6,
        }
    }

    /// Render the host as a connectable string.
    ///
    /// IPv4 becomes dot-separated decimal octets, domains pass through
    /// unchanged (hostname validity is left to the outbound connector), and
    /// IPv6 becomes eight big-endian 16-bit words in lowercase hex joined by
    /// colons. No zero-run compression is applied, so 16 zero bytes render
    /// as "0:0:0:0:0:0:0:0".
    pub fn to_host_string(&self) -> String {
        match self {
            HostRef::Ipv4(octets) => {
                format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
            }
            HostRef::Domain(domain) => (*domain).to_string(),
            HostRef::Ipv6(octets) => {
                let mut out = String::with_capacity(39);
                for (i, pair) in octets.chunks_exact(2).enumerate() {
                    if i > 0 {
                        out.push(':');
                    }
                    let word = u16::from_be_bytes([pair[0], pair[1]]);
                    let _ = write!(out, "{:x}", word);
                }
                out
            }
        }
    }
}

/// A parsed VLESS handshake, borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake<'a> {
    /// Protocol version byte, echoed back verbatim in the acknowledgment.
    pub version: u8,
    /// The 16-byte client credential (always `CREDENTIAL_LEN` long).
    pub credential: &'a [u8],
    pub host: HostRef<'a>,
    pub port: u16,
    /// Total header length; `payload` starts here.
    pub header_len: usize,
    /// Payload to forward upstream before entering steady-state relay.
    /// May be empty.
    pub payload: &'a [u8],
}

/// Parse a handshake buffer.
///
/// Offsets are computed sequentially: the addon area is skipped by its
/// declared length and the command byte is stepped over without being
/// interpreted. Any buffer too short for the step at hand yields
/// [`ParseError::Truncated`] instead of panicking.
#[inline]
pub fn parse_handshake(buf: &[u8]) -> Result<Handshake<'_>, ParseError> {
    need(buf, MIN_HANDSHAKE_BYTES)?;
    let version = buf[0];
    let credential = &buf[1..1 + CREDENTIAL_LEN];
    let addon_len = buf[MIN_HANDSHAKE_BYTES - 1] as usize;

    // addons, then command + port + atyp
    let mut offset = MIN_HANDSHAKE_BYTES + addon_len;
    need(buf, offset + 4)?;
    offset += 1;
    let port = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    offset += 2;
    let atyp = Atyp::from_byte(buf[offset])?;
    offset += 1;

    let (host, addr_len) = atyp.decode(&buf[offset..]).map_err(|e| match e {
        ParseError::Truncated(n) => ParseError::Truncated(offset + n),
        other => other,
    })?;
    offset += addr_len;

    Ok(Handshake {
        version,
        credential,
        host,
        port,
        header_len: offset,
        payload: &buf[offset..],
    })
}

/// Success acknowledgment: the client's version byte followed by a zero.
#[inline]
pub fn ack(version: u8) -> [u8; ACK_LEN] {
    [version, 0]
}

/// Writes a handshake header (no addons, TCP command) to the buffer.
///
/// # Errors
/// - `DomainTooLong` if the host is a domain longer than 255 bytes.
#[allow(clippy::cast_possible_truncation)]
pub fn write_handshake(
    buf: &mut BytesMut,
    version: u8,
    credential: &Credential,
    host: &HostRef<'_>,
    port: u16,
) -> Result<(), WriteError> {
    if let HostRef::Domain(d) = host {
        if d.len() > MAX_DOMAIN_LEN {
            return Err(WriteError::DomainTooLong);
        }
    }
    buf.extend_from_slice(&[version]);
    buf.extend_from_slice(credential.as_bytes());
    buf.extend_from_slice(&[0, CMD_TCP]);
    buf.extend_from_slice(&port.to_be_bytes());
    buf.extend_from_slice(&[host.atyp().byte()]);
    match host {
        HostRef::Ipv4(octets) => buf.extend_from_slice(octets),
        HostRef::Domain(domain) => {
            buf.extend_from_slice(&[domain.len() as u8]);
            buf.extend_from_slice(domain.as_bytes());
        }
        HostRef::Ipv6(octets) => buf.extend_from_slice(octets),
    }
    Ok(())
}

/// The configured 16-byte client credential.
///
/// Parsed once at startup from a UUID string and injected into session
/// construction; sessions only ever read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential([u8; CREDENTIAL_LEN]);

impl Credential {
    #[inline]
    pub fn new(bytes: [u8; CREDENTIAL_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a UUID string, with or without dashes.
    pub fn from_uuid(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(*uuid::Uuid::parse_str(s)?.as_bytes()))
    }

    /// Exact-match comparison against the credential slice of a handshake.
    ///
    /// Rejection carries no information about which byte differed: the
    /// caller closes the connection without writing anything either way.
    #[inline]
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate == self.0.as_slice()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.0
    }
}

impl FromStr for Credential {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uuid(s)
    }
}

#[inline]
fn need(buf: &[u8], n: usize) -> Result<(), ParseError> {
    if buf.len() < n {
        return Err(ParseError::Truncated(n));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "a2c803ad-84dd-4ad7-9580-be9be3f7e1af";

    fn credential() -> Credential {
        Credential::from_uuid(UUID).unwrap()
    }

    fn sample(host: HostRef<'_>, port: u16, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        write_handshake(&mut buf, 0, &credential(), &host, port).unwrap();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parse_ipv4() {
        let buf = sample(HostRef::Ipv4([127, 0, 0, 1]), 8080, b"hello");
        let hs = parse_handshake(&buf).unwrap();
        assert_eq!(hs.version, 0);
        assert_eq!(hs.credential, credential().as_bytes());
        assert_eq!(hs.host, HostRef::Ipv4([127, 0, 0, 1]));
        assert_eq!(hs.port, 8080);
        assert_eq!(hs.payload, b"hello");
    }

    #[test]
    fn parse_domain() {
        let buf = sample(HostRef::Domain("localhost"), 443, b"");
        let hs = parse_handshake(&buf).unwrap();
        assert_eq!(hs.host, HostRef::Domain("localhost"));
        assert_eq!(hs.port, 443);
        assert!(hs.payload.is_empty());
    }

    #[test]
    fn parse_ipv6() {
        let mut ip = [0u8; 16];
        ip[15] = 1;
        let buf = sample(HostRef::Ipv6(ip), 53, b"q");
        let hs = parse_handshake(&buf).unwrap();
        assert_eq!(hs.host, HostRef::Ipv6(ip));
        assert_eq!(hs.port, 53);
        assert_eq!(hs.payload, b"q");
    }

    #[test]
    fn parse_skips_addons() {
        // Hand-build a handshake with a 3-byte addon area.
        let mut buf = Vec::new();
        buf.push(0);
        buf.extend_from_slice(credential().as_bytes());
        buf.push(3);
        buf.extend_from_slice(&[0xaa, 0xbb, 0xcc]);
        buf.push(CMD_TCP);
        buf.extend_from_slice(&443u16.to_be_bytes());
        buf.push(ATYP_IPV4);
        buf.extend_from_slice(&[10, 0, 0, 7]);
        buf.extend_from_slice(b"payload");

        let hs = parse_handshake(&buf).unwrap();
        assert_eq!(hs.host, HostRef::Ipv4([10, 0, 0, 7]));
        assert_eq!(hs.port, 443);
        assert_eq!(hs.payload, b"payload");
    }

    #[test]
    fn parse_port_is_big_endian() {
        let buf = sample(HostRef::Ipv4([1, 2, 3, 4]), 0x1234, b"");
        let hs = parse_handshake(&buf).unwrap();
        assert_eq!(hs.port, 0x1234);
    }

    #[test]
    fn parse_invalid_atyp() {
        let mut buf = sample(HostRef::Ipv4([1, 2, 3, 4]), 80, b"");
        // atyp byte sits right after version + credential + addon len +
        // command + port
        buf[MIN_HANDSHAKE_BYTES + 3] = 9;
        assert_eq!(parse_handshake(&buf), Err(ParseError::InvalidAtyp(9)));
    }

    #[test]
    fn parse_invalid_domain_utf8() {
        let mut buf = BytesMut::new();
        write_handshake(&mut buf, 0, &credential(), &HostRef::Domain("ab"), 80).unwrap();
        let domain_start = buf.len() - 2;
        buf[domain_start] = 0xff;
        buf[domain_start + 1] = 0xfe;
        assert_eq!(parse_handshake(&buf), Err(ParseError::InvalidDomainUtf8));
    }

    #[test]
    fn parse_empty_domain_is_accepted() {
        // A zero-length domain is not this layer's problem; the outbound
        // connector fails on it.
        let buf = sample(HostRef::Domain(""), 80, b"");
        let hs = parse_handshake(&buf).unwrap();
        assert_eq!(hs.host, HostRef::Domain(""));
    }

    #[test]
    fn every_truncation_is_rejected_without_panic() {
        let full = sample(HostRef::Domain("example.com"), 443, b"body");
        for len in 0..full.len() {
            match parse_handshake(&full[..len]) {
                Err(ParseError::Truncated(needed)) => assert!(needed > len),
                Ok(hs) => {
                    // Truncating only the payload still parses; the header
                    // itself must be complete.
                    assert!(len >= hs.header_len);
                }
                Err(other) => panic!("unexpected error at len {}: {:?}", len, other),
            }
        }
    }

    #[test]
    fn render_ipv4() {
        assert_eq!(
            HostRef::Ipv4([127, 0, 0, 1]).to_host_string(),
            "127.0.0.1"
        );
    }

    #[test]
    fn render_domain() {
        assert_eq!(HostRef::Domain("localhost").to_host_string(), "localhost");
    }

    #[test]
    fn render_ipv6_uncompressed() {
        assert_eq!(
            HostRef::Ipv6([0u8; 16]).to_host_string(),
            "0:0:0:0:0:0:0:0"
        );

        let mut ip = [0u8; 16];
        ip[0] = 0x20;
        ip[1] = 0x01;
        ip[2] = 0x0d;
        ip[3] = 0xb8;
        ip[15] = 0x01;
        assert_eq!(
            HostRef::Ipv6(ip).to_host_string(),
            "2001:db8:0:0:0:0:0:1"
        );
    }

    #[test]
    fn credential_roundtrip_and_matching() {
        let with_dashes = Credential::from_uuid(UUID).unwrap();
        let without = Credential::from_uuid(&UUID.replace('-', "")).unwrap();
        assert_eq!(with_dashes, without);

        let buf = sample(HostRef::Ipv4([1, 2, 3, 4]), 80, b"");
        let hs = parse_handshake(&buf).unwrap();
        assert!(with_dashes.matches(hs.credential));

        let mut flipped = *with_dashes.as_bytes();
        flipped[7] ^= 0x01;
        assert!(!Credential::new(flipped).matches(hs.credential));
        assert!(!with_dashes.matches(&flipped[..8]));
    }

    #[test]
    fn write_handshake_domain_too_long() {
        let long = "a".repeat(256);
        let mut buf = BytesMut::new();
        let res = write_handshake(&mut buf, 0, &credential(), &HostRef::Domain(&long), 80);
        assert_eq!(res, Err(WriteError::DomainTooLong));
    }

    #[test]
    fn ack_echoes_version() {
        assert_eq!(ack(0), [0, 0]);
        assert_eq!(ack(7), [7, 0]);
    }
}
