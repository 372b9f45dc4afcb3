#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::domain::models::ChatExchange;
use crate::domain::models::ExchangeStore;

pub type StoreArc = Arc<dyn ExchangeStore + Send + Sync>;

/// Sends finished exchanges to the save exchange collaborator, never more
/// than one at a time and never the last saved one again. Failures are logged
/// and dropped.
#[derive(Clone)]
pub struct PersistenceGuard {
    store: StoreArc,
    saving: Arc<AtomicBool>,
    last_saved: Arc<Mutex<Option<String>>>,
}

impl PersistenceGuard {
    pub fn new(store: StoreArc) -> PersistenceGuard {
        return PersistenceGuard {
            store,
            saving: Arc::new(AtomicBool::new(false)),
            last_saved: Arc::new(Mutex::new(None)),
        };
    }

    pub fn is_saving(&self) -> bool {
        return self.saving.load(Ordering::SeqCst);
    }

    /// Records `id` as the last saved exchange. False when it already was.
    fn mark_saved(&self, id: &str) -> bool {
        let mut last_saved = match self.last_saved.lock() {
            Ok(last_saved) => last_saved,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last_saved.as_deref() == Some(id) {
            return false;
        }

        *last_saved = Some(id.to_string());
        return true;
    }

    /// Starts saving in the background. Returns `None` when nothing was sent:
    /// an empty exchange, one already saved, or a save still in flight.
    pub fn save(&self, exchange: ChatExchange) -> Option<JoinHandle<()>> {
        if exchange.is_empty() {
            tracing::debug!(id = %exchange.id, "Skipping save of empty exchange");
            return None;
        }
        if self.saving.swap(true, Ordering::SeqCst) {
            tracing::debug!(id = %exchange.id, "Save already in flight");
            return None;
        }
        if !self.mark_saved(&exchange.id) {
            tracing::debug!(id = %exchange.id, "Exchange already saved");
            self.saving.store(false, Ordering::SeqCst);
            return None;
        }

        let store = self.store.clone();
        let saving = self.saving.clone();
        return Some(tokio::spawn(async move {
            match store.save(&exchange).await {
                Ok(res) if res.skipped => {
                    tracing::debug!(id = %exchange.id, reason = ?res.reason, "Exchange save skipped");
                }
                Ok(_) => {
                    tracing::debug!(id = %exchange.id, "Exchange saved");
                }
                Err(err) => {
                    tracing::warn!(id = %exchange.id, error = ?err, "Failed to save exchange");
                }
            }

            saving.store(false, Ordering::SeqCst);
        }));
    }
}
