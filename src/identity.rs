use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller identity handed in by the auth collaborator. The core never issues or stores these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub key_id: Uuid,
    pub account_id: Uuid,
    pub rate_limit_rpm: u32,
    pub rate_limit_tpm: u32,
}

impl Identity {
    pub fn new(key_id: Uuid, account_id: Uuid, rate_limit_rpm: u32, rate_limit_tpm: u32) -> Self {
        Self {
            key_id,
            account_id,
            rate_limit_rpm,
            rate_limit_tpm,
        }
    }
}
