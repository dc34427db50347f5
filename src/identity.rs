//! Client identity derived from a remote socket address.
//!
//! The gate keys limits on a bare IPv4 address. Callers turn whatever their
//! listener reports (`ip:port`, a bare IP, an IPv4-mapped IPv6 address)
//! into a [`ClientIdentity`] before calling [`crate::Gate::check`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{GateError, Result};

/// A normalized client address usable as a rate limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity(Ipv4Addr);

impl ClientIdentity {
    /// Parse a remote address, stripping any port.
    pub fn from_remote_addr(remote: &str) -> Result<Self> {
        let remote = remote.trim();
        let ip = match remote.parse::<SocketAddr>() {
            Ok(addr) => addr.ip(),
            Err(_) => remote
                .parse::<IpAddr>()
                .map_err(|_| GateError::InvalidIdentity(format!("not an address: {:?}", remote)))?,
        };
        Self::from_ip(ip)
    }

    /// Normalize an IP address. IPv4-mapped IPv6 addresses become IPv4;
    /// any other IPv6 address is rejected.
    pub fn from_ip(ip: IpAddr) -> Result<Self> {
        match ip {
            IpAddr::V4(v4) => Ok(Self(v4)),
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(Self).ok_or_else(|| {
                GateError::InvalidIdentity(format!("IPv6 clients are not supported: {}", v6))
            }),
        }
    }

    /// The normalized IPv4 address.
    pub fn ip(&self) -> Ipv4Addr {
        self.0
    }

    /// The string key stored in the counter store.
    pub fn as_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClientIdentity {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_remote_addr(s)
    }
}
