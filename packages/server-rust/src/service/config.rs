/// Process-level configuration shared by every subcommand.
///
/// Component configs (`GatewayConfig`, `BrokerConfig`, `ImporterConfig`,
/// `NetworkConfig`) are assembled from CLI flags in `main` and carried here.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identifier stamped into HLC timestamps of events produced by this process.
    pub node_id: String,
    /// Interval between broker housekeeping ticks in milliseconds.
    pub housekeeping_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: "cardvault".to_string(),
            housekeeping_interval_ms: 60_000,
        }
    }
}
