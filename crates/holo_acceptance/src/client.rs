//! Store-access client capability consumed by the check.
//!
//! The check only needs to connect to a node and scan a key span; transport,
//! authentication, and retries belong to the implementation.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;

use crate::descriptor::ScanRow;

/// Read-only scan access to a running store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Return up to `limit` rows with keys in `[start, end)`, in key order.
    async fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> anyhow::Result<Vec<ScanRow>>;
}

/// Opens [`StoreClient`]s against a node endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: StoreClient;

    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Self::Client>;
}

/// Connection target: `scheme://principal@host:port?certs=<dir>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub principal: String,
    pub host: String,
    pub port: u16,
    pub certs_dir: PathBuf,
}

impl Endpoint {
    pub fn for_node(scheme: &str, principal: &str, addr: SocketAddr, certs_dir: &Path) -> Self {
        Self {
            scheme: scheme.to_string(),
            principal: principal.to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            certs_dir: certs_dir.to_path_buf(),
        }
    }

    pub fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Resolve the endpoint to a socket address when the host is an IP literal.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.host_port()
            .parse::<SocketAddr>()
            .with_context(|| format!("endpoint host {} is not an ip address", self.host))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}?certs={}",
            self.scheme,
            self.principal,
            self.host_port(),
            self.certs_dir.display()
        )
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| anyhow::anyhow!("endpoint {raw:?} is missing a scheme"))?;
        let (principal, rest) = rest
            .split_once('@')
            .ok_or_else(|| anyhow::anyhow!("endpoint {raw:?} is missing a principal"))?;
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("endpoint {raw:?} is missing a port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse::<u16>()
            .with_context(|| format!("endpoint {raw:?} has an invalid port"))?;

        let mut certs_dir = None;
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            if let Some(dir) = pair.strip_prefix("certs=") {
                certs_dir = Some(PathBuf::from(dir));
            }
        }
        let certs_dir =
            certs_dir.ok_or_else(|| anyhow::anyhow!("endpoint {raw:?} is missing certs="))?;

        anyhow::ensure!(!scheme.is_empty(), "endpoint {raw:?} has an empty scheme");
        anyhow::ensure!(!principal.is_empty(), "endpoint {raw:?} has an empty principal");
        anyhow::ensure!(!host.is_empty(), "endpoint {raw:?} has an empty host");

        Ok(Self {
            scheme: scheme.to_string(),
            principal: principal.to_string(),
            host: host.to_string(),
            port,
            certs_dir,
        })
    }
}
