//! Agent connection admission
//!
//! Two gates, applied in order:
//! 1. Network origin (optional): loopback, 100.64.0.0/10 or fdaa::/16 only.
//! 2. Shared-secret token, compared in constant time.
//!
//! No retry limiting happens here; a rejected agent simply reconnects later.

use crate::error::Error;
use std::net::{IpAddr, SocketAddr};

/// WebSocket close code used for both rejections
pub const CLOSE_FORBIDDEN: u16 = 4003;

/// Why an agent connection was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Source address outside the private-network allow-list
    PrivateNetworkRequired { client_ip: String },
    /// Missing or wrong token
    InvalidToken,
}

impl Rejection {
    /// Reason sent in the close frame
    pub fn close_reason(&self) -> &'static str {
        match self {
            Rejection::PrivateNetworkRequired { .. } => "Forbidden: Private network required",
            Rejection::InvalidToken => "Forbidden",
        }
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::PrivateNetworkRequired { client_ip } => {
                Error::Unauthorized(format!("non-private origin {}", client_ip))
            }
            Rejection::InvalidToken => Error::Unauthorized("invalid token".to_string()),
        }
    }
}

/// Admission policy for the agent WebSocket
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    require_private_network: bool,
    auth_token: String,
}

impl AdmissionGate {
    pub fn new(require_private_network: bool, auth_token: impl Into<String>) -> Self {
        Self {
            require_private_network,
            auth_token: auth_token.into(),
        }
    }

    /// Apply both gates to a connection attempt
    pub fn check(&self, client_ip: &str, token: Option<&str>) -> Result<(), Rejection> {
        if self.require_private_network && !is_private_network_ip(client_ip) {
            return Err(Rejection::PrivateNetworkRequired {
                client_ip: client_ip.to_string(),
            });
        }

        match token {
            Some(token) if tokens_match(token, &self.auth_token) => Ok(()),
            _ => Err(Rejection::InvalidToken),
        }
    }

    /// Check an `Authorization: Bearer <token>` header value
    pub fn check_bearer(&self, header: Option<&str>) -> bool {
        header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|token| tokens_match(token, &self.auth_token))
            .unwrap_or(false)
    }
}

/// Constant-time token comparison. An empty expected secret never matches.
pub fn tokens_match(supplied: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    #[allow(deprecated)]
    ring::constant_time::verify_slices_are_equal(supplied.as_bytes(), expected.as_bytes()).is_ok()
}

/// Originating client address: first `X-Forwarded-For` entry, else the peer
pub fn client_ip(forwarded_for: Option<&str>, peer: Option<SocketAddr>) -> String {
    if let Some(first) = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
    {
        return first.to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Loopback, CGNAT (Tailscale) 100.64.0.0/10, or private IPv6 fdaa::/16
pub fn is_private_network_ip(ip: &str) -> bool {
    let Ok(ip) = ip.parse::<IpAddr>() else {
        return false;
    };

    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    };

    if ip.is_loopback() {
        return true;
    }

    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 100 && (octets[1] & 0xC0) == 64
        }
        IpAddr::V6(v6) => v6.segments()[0] == 0xfdaa,
    }
}
