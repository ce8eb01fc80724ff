//! Utility functions for record identifiers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique record id then encode using bech32, e.g. `res1...`
pub fn new_record_id(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
