use clap::Parser;

use sia_common::crypto::Hash;

// bind addresses
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:9980";
pub const DEFAULT_RPC_BIND_ADDRESS: &str = "0.0.0.0:9981";
pub const DEFAULT_HOST_BIND_ADDRESS: &str = "0.0.0.0:9982";

// User agent every API client must present unless the check is disabled
pub const REQUIRED_USER_AGENT: &str = "Sia-Agent";

// Gateway rules
// maximum peers kept connected at once
pub const MAX_PEERS: usize = 32;
// maximum packet size accepted from a peer, 8 MiB
pub const MAX_PACKET_SIZE: u32 = 8 * 1024 * 1024;
// millis to wait for a peer to answer a block request
pub const PEER_REQUEST_TIMEOUT_MS: u64 = 15_000;
// how many recently relayed object hashes each peer connection remembers
pub const PEER_RELAY_CACHE_SIZE: usize = 1024;

// Subscription bus
// queue depth per subscriber; publishing blocks when the slowest subscriber
// falls this far behind
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

// Shutdown rules
// seconds the API server is given to drain in-flight requests
pub const SHUTDOWN_API_GRACE_SECS: u64 = 1;
// seconds a module close may take before the sweep reports it deadlocked
pub const SHUTDOWN_MODULE_TIMEOUT_SECS: u64 = 3;

// Reserved consensus change ID meaning "deliver from genesis"
pub const CONSENSUS_CHANGE_BEGINNING: Hash = Hash::zero();

// Genesis rules: every node starts from the same deterministic block
pub const GENESIS_TIMESTAMP: u64 = 1_717_200_000;

// Module selection string: one letter per module, mirroring the route groups
// g = gateway, c = consensus, t = tpool, w = wallet, h = host, r = renter,
// m = miner, e = explorer
pub const DEFAULT_MODULES: &str = "gctwhrm";

#[derive(Parser, Clone, Debug)]
#[command(name = "siad", version, about = "sia-rs storage network daemon")]
pub struct NodeConfig {
    /// Address the HTTP API listens on
    #[arg(long, default_value = DEFAULT_API_BIND_ADDRESS)]
    pub api_addr: String,

    /// Address the gateway listens on for peer connections
    #[arg(long, default_value = DEFAULT_RPC_BIND_ADDRESS)]
    pub rpc_addr: String,

    /// Address the host listens on for renter connections
    #[arg(long, default_value = DEFAULT_HOST_BIND_ADDRESS)]
    pub host_addr: String,

    /// Directory all modules persist their state under
    #[arg(long, default_value = ".sia")]
    pub data_dir: String,

    /// Substring the User-Agent header must contain; empty disables the check
    #[arg(long, default_value = REQUIRED_USER_AGENT)]
    pub agent: String,

    /// Password protecting the API; empty disables authentication
    #[arg(long, default_value = "")]
    pub api_password: String,

    /// Skip connecting to bootstrap peers on startup
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Modules to load, one letter each (g,c,t,w,h,r,m,e)
    #[arg(long, short = 'M', default_value = DEFAULT_MODULES)]
    pub modules: String,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write logs to <data-dir>/logs/
    #[arg(long)]
    pub log_to_disk: bool,
}

impl NodeConfig {
    pub fn has_module(&self, letter: char) -> bool {
        self.modules.contains(letter)
    }

    // the API password check is optional; an empty string disables it
    pub fn requires_auth(&self) -> bool {
        !self.api_password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modules_exclude_explorer() {
        let config = NodeConfig::parse_from(["siad"]);
        assert!(config.has_module('c'));
        assert!(config.has_module('w'));
        assert!(!config.has_module('e'));
    }

    #[test]
    fn test_auth_disabled_by_default() {
        let config = NodeConfig::parse_from(["siad"]);
        assert!(!config.requires_auth());
    }
}
