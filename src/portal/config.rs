//! Portal Server Configuration
//!
//! Listener and HTTP-layer settings with localhost-first defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1)
    pub bind_addr: IpAddr,
    /// Port number (default: 8080)
    pub port: u16,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
    /// Enable request logging
    pub log_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            cors_origins: vec![
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            log_requests: true,
        }
    }
}

impl ServerConfig {
    /// Check if bound to localhost only
    pub fn is_localhost(&self) -> bool {
        match self.bind_addr {
            IpAddr::V4(addr) => addr.is_loopback(),
            IpAddr::V6(addr) => addr.is_loopback(),
        }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> String {
        let scheme = "http"; // HTTPS handled by reverse proxy
        format!("{}://{}:{}", scheme, self.bind_addr, self.port)
    }
}
