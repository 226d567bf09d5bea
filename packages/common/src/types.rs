use serde::{Deserialize, Serialize};

// Shared between the backend and bridge clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceFlowResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// What a client should do after polling a device flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// The user has not approved yet; keep polling.
    Pending,
    Authorized,
    /// The provider refused the grant; start a new flow.
    Denied,
    /// The device code ran out of time; start a new flow.
    Expired,
}

impl PollStatus {
    /// Terminal statuses require the client to restart the flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollStatus::Denied | PollStatus::Expired)
    }
}
