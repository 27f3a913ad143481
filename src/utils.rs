//! Utility functions for identifier generation.

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32 with a readable prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Fresh deal record id (`deal_...`).
pub fn new_deal_id() -> crate::error::Result<String> {
    prefixed("deal_")
}

/// Fresh project scope id (`proj_...`).
pub fn new_project_id() -> crate::error::Result<String> {
    prefixed("proj_")
}

fn prefixed(hrp: &str) -> crate::error::Result<String> {
    new_uuid_to_bech32(hrp).map_err(|e| crate::error::LifecycleError::Unavailable(e.to_string()))
}
