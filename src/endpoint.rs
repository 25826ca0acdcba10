//! Endpoint addressing.
//!
//! One endpoint per client, written the ZeroMQ way (`tcp://host:port`)
//! and resolved once when the client connects.

use core::fmt;
use core::str::FromStr;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// Transport part of an endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

/// A `transport://host:port` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: host.into(),
            port,
        }
    }

    /// Resolve to the first socket address the host maps to.
    pub fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve {self}: {e}")))?
            .next()
            .ok_or_else(|| Error::Config(format!("{self} resolved to no address")))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("endpoint `{s}` has no scheme")))?;
        let scheme = match scheme {
            "tcp" => Scheme::Tcp,
            other => return Err(Error::Config(format!("unsupported transport `{other}`"))),
        };

        // rsplit so bracketed IPv6 hosts keep their colons.
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("endpoint `{s}` has no port")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::Config(format!("endpoint `{s}` has no host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("endpoint `{s}` has an invalid port")))?;

        Ok(Self {
            scheme,
            host: host.to_owned(),
            port,
        })
    }
}
