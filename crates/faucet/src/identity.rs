//! Client network identity used for IP-scope rate limiting

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_IP_HEADER: &str = "x-real-ip";

/// Where the client address comes from.
///
/// `Header` is only safe behind a reverse proxy that overwrites the header;
/// without one any client can pick its own identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientIpSource {
    /// Peer address of the TCP connection
    #[default]
    Socket,
    /// Address set by a trusted reverse proxy in the named header
    Header(String),
}

impl ClientIpSource {
    pub fn parse(source: &str, header: &str) -> Result<Self, String> {
        match source.trim().to_lowercase().as_str() {
            "socket" => Ok(ClientIpSource::Socket),
            "header" | "proxy" => {
                let header = header.trim().to_lowercase();
                axum::http::HeaderName::from_str(&header)
                    .map_err(|_| format!("Invalid client IP header name: {:?}", header))?;
                Ok(ClientIpSource::Header(header))
            }
            other => Err(format!(
                "Unknown client IP source {:?} (expected \"socket\" or \"header\")",
                other
            )),
        }
    }

    /// Resolves the identity of the client behind a request.
    ///
    /// A missing or unparsable proxy header falls back to the peer address,
    /// which behind a proxy is the proxy itself and so shares one quota.
    pub fn client_ip(&self, headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
        match self {
            ClientIpSource::Socket => peer.ip(),
            ClientIpSource::Header(name) => {
                let forwarded = headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .and_then(|v| v.trim().parse::<IpAddr>().ok());

                forwarded.unwrap_or_else(|| {
                    warn!("Header {} missing or invalid; using peer address {}", name, peer.ip());
                    peer.ip()
                })
            }
        }
    }
}
