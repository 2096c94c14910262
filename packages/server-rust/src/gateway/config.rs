//! Gateway configuration.

use std::time::Duration;

use super::discovery::{ServiceAddress, ServiceRegistration};
use super::route::RouteTable;

/// Load-balancing policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BalancerKind {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub routes: RouteTable,
    /// DNS registrations consulted for `lb://` targets.
    pub registrations: Vec<ServiceRegistration>,
    pub balancer: BalancerKind,
    /// Per-request budget for the backend call, including the response body.
    pub upstream_timeout: Duration,
    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            routes: RouteTable::default(),
            registrations: vec![ServiceRegistration {
                name: "catalog-service".to_string(),
                address: ServiceAddress {
                    host: "catalog-service".to_string(),
                    port: 8081,
                    is_secure: false,
                },
            }],
            balancer: BalancerKind::RoundRobin,
            upstream_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.routes.rules().len(), 3);
        assert_eq!(config.registrations[0].to_string(), "catalog-service=catalog-service:8081");
        assert_eq!(config.balancer, BalancerKind::RoundRobin);
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
    }
}
