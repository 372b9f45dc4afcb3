#[cfg(test)]
#[path = "exchange_log_test.rs"]
mod tests;

use chrono::DateTime;
use chrono::Utc;
use dashmap::DashMap;

use crate::domain::models::ExchangeBody;
use crate::domain::models::SaveResponse;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredExchange {
    pub input_text: String,
    pub output_text: String,
    pub recorded_at: DateTime<Utc>,
}

/// The latest saved exchange per caller.
#[derive(Default)]
pub struct ExchangeLog {
    latest: DashMap<String, StoredExchange>,
}

impl ExchangeLog {
    pub fn record(&self, key: &str, body: &ExchangeBody, now: DateTime<Utc>) -> SaveResponse {
        if body.input_text.trim().is_empty() || body.output_text.trim().is_empty() {
            return skipped("empty exchange");
        }

        let mut entry = self.latest.entry(key.to_string()).or_insert(StoredExchange {
            input_text: "".to_string(),
            output_text: "".to_string(),
            recorded_at: now,
        });
        if entry.input_text == body.input_text && entry.output_text == body.output_text {
            return skipped("duplicate of the latest exchange");
        }

        *entry = StoredExchange {
            input_text: body.input_text.to_string(),
            output_text: body.output_text.to_string(),
            recorded_at: now,
        };

        return SaveResponse {
            skipped: false,
            reason: None,
        };
    }

    pub fn last_recorded_at(&self, key: &str) -> Option<DateTime<Utc>> {
        return self.latest.get(key).map(|entry| return entry.recorded_at);
    }

    /// Forgets callers whose latest exchange was recorded before `before`.
    pub fn prune(&self, before: DateTime<Utc>) {
        self.latest.retain(|_, entry| return entry.recorded_at >= before);
    }

    pub fn tracked_keys(&self) -> usize {
        return self.latest.len();
    }
}

fn skipped(reason: &str) -> SaveResponse {
    return SaveResponse {
        skipped: true,
        reason: Some(reason.to_string()),
    };
}
