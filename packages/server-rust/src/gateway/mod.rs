//! Edge gateway: correlation ids, path routing, discovery and forwarding.

pub mod balancer;
pub mod config;
pub mod correlation;
pub mod discovery;
pub mod error;
pub mod proxy;
pub mod route;
pub mod upstream;

pub use balancer::{LoadBalancer, RandomChoice, RoundRobin};
pub use config::{BalancerKind, GatewayConfig};
pub use correlation::{CorrelationLayer, CorrelationService};
pub use discovery::{
    DnsDiscovery, Endpoint, ServiceDiscovery, ServiceRegistration, StaticDiscovery,
};
pub use error::GatewayError;
pub use proxy::Gateway;
pub use route::{RouteConfigError, RouteFilter, RouteRule, RouteTable, RouteTarget};
pub use upstream::{HttpUpstream, Upstream, UpstreamError};
