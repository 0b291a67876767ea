pub mod explorer;
pub mod host;
pub mod renter;

use serde::{Deserialize, Serialize};

// Peer as reported by /gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "netaddress")]
    pub net_address: String,
    pub inbound: bool,
    pub version: String,
}

// Standard error body for every non-2xx API response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}
