//! Service discovery.
//!
//! `resolve` is re-evaluated on every call; nothing here caches a resolved
//! address list across requests, so replicas that appear or disappear are
//! visible on the next request.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// One network location of a service replica. Lives for one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// `"{service}-{index}"`, stable within one resolution.
    pub instance_id: String,
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub is_secure: bool,
}

impl Endpoint {
    /// Base URI such as `http://10.0.0.3:8081`.
    #[must_use]
    pub fn base_uri(&self) -> String {
        let scheme = if self.is_secure { "https" } else { "http" };
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("{scheme}://[{v6}]:{}", self.port),
            _ => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }
}

/// Resolves a logical service name to its current endpoints.
///
/// Implementations never fail: an unresolvable name yields an empty list,
/// which callers treat as "service currently unavailable".
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn resolve(&self, service_name: &str) -> Vec<Endpoint>;
}

// ---------------------------------------------------------------------------
// DnsDiscovery
// ---------------------------------------------------------------------------

/// DNS address of a registered service: `name=host:port[:secure]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
    pub is_secure: bool,
}

/// Registry entry parsed from `name=host:port[:secure]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub name: String,
    pub address: ServiceAddress,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid service registration {0:?}, expected name=host:port[:secure]")]
pub struct InvalidRegistration(pub String);

impl FromStr for ServiceRegistration {
    type Err = InvalidRegistration;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRegistration(s.to_string());
        let (name, addr) = s.split_once('=').ok_or_else(invalid)?;
        let mut parts = addr.split(':');
        let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(invalid)?;
        let is_secure = match parts.next() {
            None => false,
            Some("secure") => true,
            Some(_) => return Err(invalid()),
        };
        if name.is_empty() || parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            address: ServiceAddress {
                host: host.to_string(),
                port,
                is_secure,
            },
        })
    }
}

impl fmt::Display for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.name, self.address.host, self.address.port)?;
        if self.address.is_secure {
            f.write_str(":secure")?;
        }
        Ok(())
    }
}

/// Resolves registered services through the system resolver.
///
/// A DNS name backed by several records (one per replica, as container
/// orchestrators publish them) yields one endpoint per address.
#[derive(Debug, Default)]
pub struct DnsDiscovery {
    services: HashMap<String, ServiceAddress>,
}

impl DnsDiscovery {
    #[must_use]
    pub fn new(registrations: impl IntoIterator<Item = ServiceRegistration>) -> Self {
        Self {
            services: registrations
                .into_iter()
                .map(|r| (r.name, r.address))
                .collect(),
        }
    }
}

#[async_trait]
impl ServiceDiscovery for DnsDiscovery {
    async fn resolve(&self, service_name: &str) -> Vec<Endpoint> {
        let Some(address) = self.services.get(service_name) else {
            warn!(service = service_name, "service is not registered");
            return Vec::new();
        };

        let resolved = match tokio::net::lookup_host((address.host.as_str(), address.port)).await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(service = service_name, host = %address.host, error = %e, "service lookup failed");
                return Vec::new();
            }
        };

        let mut ips: Vec<IpAddr> = resolved.map(|a| a.ip()).collect();
        ips.sort();
        ips.dedup();

        let endpoints: Vec<Endpoint> = ips
            .into_iter()
            .enumerate()
            .map(|(i, ip)| Endpoint {
                instance_id: format!("{service_name}-{i}"),
                service_name: service_name.to_string(),
                host: ip.to_string(),
                port: address.port,
                is_secure: address.is_secure,
            })
            .collect();
        debug!(service = service_name, replicas = endpoints.len(), "service resolved");
        endpoints
    }
}

// ---------------------------------------------------------------------------
// StaticDiscovery
// ---------------------------------------------------------------------------

/// Discovery over an explicitly managed replica list.
///
/// Replicas can be added and removed at runtime; each `resolve` reads the
/// current list.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    replicas: RwLock<HashMap<String, Vec<(String, u16, bool)>>>,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_replica(&self, service: &str, host: impl Into<String>, port: u16) {
        self.replicas
            .write()
            .entry(service.to_string())
            .or_default()
            .push((host.into(), port, false));
    }

    /// Removes every replica of `service` listening on `host:port`.
    pub fn remove_replica(&self, service: &str, host: &str, port: u16) {
        if let Some(list) = self.replicas.write().get_mut(service) {
            list.retain(|(h, p, _)| !(h == host && *p == port));
        }
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn resolve(&self, service_name: &str) -> Vec<Endpoint> {
        self.replicas
            .read()
            .get(service_name)
            .map(|list| {
                list.iter()
                    .enumerate()
                    .map(|(i, (host, port, secure))| Endpoint {
                        instance_id: format!("{service_name}-{i}"),
                        service_name: service_name.to_string(),
                        host: host.clone(),
                        port: *port,
                        is_secure: *secure,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
