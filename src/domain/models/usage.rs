#[cfg(test)]
#[path = "usage_test.rs"]
mod tests;

use anyhow::Result;
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Opens an in-band usage event inside a generation stream.
pub const USAGE_START_MARKER: &str = "<<<USAGE>>>";
/// Closes an in-band usage event.
pub const USAGE_END_MARKER: &str = "<<<END_USAGE>>>";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    #[default]
    Guest,
    Free,
    Premium,
}

/// Authoritative quota state for a caller, computed server side. A newer
/// snapshot always replaces an older one wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub user_type: UserType,
    pub can_use: bool,
}

impl UsageSnapshot {
    pub fn new(used: u32, limit: u32, user_type: UserType) -> UsageSnapshot {
        let remaining = limit.saturating_sub(used);
        return UsageSnapshot {
            used,
            limit,
            remaining,
            user_type,
            can_use: remaining > 0,
        };
    }

    pub fn describe(&self) -> String {
        return format!(
            "{used}/{limit} requests used today, {remaining} remaining ({user_type})",
            used = self.used,
            limit = self.limit,
            remaining = self.remaining,
            user_type = self.user_type
        );
    }
}

/// Serializes a snapshot into the sentinel-delimited form embedded in
/// generation streams.
pub fn encode_usage(snapshot: &UsageSnapshot) -> Result<String> {
    let payload = serde_json::to_string(snapshot)?;
    return Ok(format!("{USAGE_START_MARKER}{payload}{USAGE_END_MARKER}"));
}
