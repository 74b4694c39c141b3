use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::CheckResult;

/// Column list shared by inserts and reads, in row order after `id`
pub const CHECK_COLUMNS: &str = "timestamp, check_type, target, reachable, latency_ms, \
                                 packet_loss, download_mbps, upload_mbps, error_message";

/// A check result as stored in `network_checks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheck {
    pub id: i64,
    pub result: CheckResult,
    /// Assigned by the database on insert
    pub created_at: DateTime<Utc>,
}

/// Fixed-width RFC 3339 text, so lexical order matches time order
pub fn timestamp_to_text(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn text_to_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|time| time.with_timezone(&Utc))
}

impl StoredCheck {
    /// Decode a row selected as `id, <CHECK_COLUMNS>, created_at`
    pub fn from_row(row: &libsql::Row) -> anyhow::Result<Self> {
        let timestamp: String = row.get(1)?;
        let check_type: String = row.get(2)?;
        let created_at: String = row.get(10)?;

        Ok(Self {
            id: row.get(0)?,
            result: CheckResult {
                timestamp: text_to_timestamp(&timestamp)?,
                check_type: check_type.parse().map_err(anyhow::Error::msg)?,
                target: row.get(3)?,
                reachable: row.get::<i64>(4)? != 0,
                latency_ms: row.get(5)?,
                packet_loss: row.get(6)?,
                download_mbps: row.get(7)?,
                upload_mbps: row.get(8)?,
                error_message: row.get(9)?,
            },
            created_at: text_to_timestamp(&created_at)?,
        })
    }
}
