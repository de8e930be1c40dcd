//! In-memory collaborators for emitter and scheduler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatgate_core::types::DbId;
use chatgate_core::EventKind;
use chatgate_db::models::delivery::{status, NewDelivery, WebhookDeliveryRow};
use chatgate_db::models::instance::WebhookConfig;
use chrono::Utc;

use crate::emitter::InstanceDirectory;
use crate::ledger::{AttemptRecord, DeliveryLedger, LedgerError};
use crate::transport::{AttemptResult, DeliveryTransport};

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// Map-backed [`DeliveryLedger`] with a switch to simulate a storage
/// outage.
#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<DbId, WebhookDeliveryRow>>,
    next_id: AtomicI64,
    writes_fail: AtomicBool,
}

impl MemoryLedger {
    /// Insert a fresh `pending` row outside the trait, for test setup.
    pub fn create_sync(&self, new: NewDelivery) -> WebhookDeliveryRow {
        let now = Utc::now();
        let row = WebhookDeliveryRow {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            instance_id: new.instance_id,
            event_type: new.event_type,
            payload: new.payload,
            webhook_url: new.webhook_url,
            status: status::PENDING.to_string(),
            response_status: None,
            response_body: None,
            retry_count: 0,
            next_retry_at: Some(new.next_retry_at),
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().insert(row.id, row.clone());
        row
    }

    pub fn get(&self, id: DbId) -> Option<WebhookDeliveryRow> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    /// Overwrite a row wholesale, for shaping crash-recovery fixtures.
    pub fn put(&self, row: WebhookDeliveryRow) {
        self.rows.lock().unwrap().insert(row.id, row);
    }

    pub fn all(&self) -> Vec<WebhookDeliveryRow> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// While set, every trait-level write returns [`LedgerError`].
    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), LedgerError> {
        if self.writes_fail.load(Ordering::SeqCst) {
            Err(LedgerError("injected storage outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeliveryLedger for MemoryLedger {
    async fn create(&self, new: NewDelivery) -> Result<WebhookDeliveryRow, LedgerError> {
        self.check_writable()?;
        Ok(self.create_sync(new))
    }

    async fn record_attempt(&self, id: DbId, attempt: AttemptRecord) -> Result<(), LedgerError> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| LedgerError(format!("no delivery {id}")))?;
        row.status = attempt.status.to_string();
        row.response_status = attempt.response_status;
        row.response_body = attempt.response_body;
        row.retry_count = attempt.retry_count;
        row.next_retry_at = attempt.next_retry_at;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<WebhookDeliveryRow>, LedgerError> {
        let mut pending: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == status::PENDING)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.next_retry_at, r.id));
        Ok(pending)
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// Map-backed [`InstanceDirectory`]; instances without an entry behave as
/// having no webhook configured.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    configs: Arc<Mutex<HashMap<DbId, WebhookConfig>>>,
}

impl MemoryDirectory {
    pub fn with_config(instance_id: DbId, url: &str, events: &[EventKind]) -> Self {
        let directory = Self::default();
        directory.set_config(instance_id, url, events);
        directory
    }

    pub fn set_config(&self, instance_id: DbId, url: &str, events: &[EventKind]) {
        self.configs.lock().unwrap().insert(
            instance_id,
            WebhookConfig {
                url: url.to_string(),
                events: events.to_vec(),
            },
        );
    }
}

#[async_trait]
impl InstanceDirectory for MemoryDirectory {
    async fn webhook_config(
        &self,
        instance_id: DbId,
    ) -> Result<Option<WebhookConfig>, LedgerError> {
        Ok(self.configs.lock().unwrap().get(&instance_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// [`DeliveryTransport`] that replays canned outcomes and counts attempts.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Vec<AttemptResult>>>,
    /// Replayed once the script is exhausted, or always when no script was
    /// given.
    fallback: AttemptResult,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn always_succeed(response_status: u16) -> Self {
        Self::with_fallback(AttemptResult {
            success: true,
            response_status: Some(response_status),
            response_body: Some("ok".into()),
        })
    }

    pub fn always_fail(response_status: u16) -> Self {
        Self::with_fallback(AttemptResult {
            success: false,
            response_status: Some(response_status),
            response_body: Some("error".into()),
        })
    }

    /// Replay `outcomes` in order, then repeat the last one.
    pub fn script(outcomes: Vec<AttemptResult>) -> Self {
        let fallback = outcomes.last().cloned().unwrap_or(AttemptResult {
            success: false,
            response_status: None,
            response_body: None,
        });
        Self {
            script: Arc::new(Mutex::new(outcomes)),
            fallback,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_fallback(fallback: AttemptResult) -> Self {
        Self {
            script: Arc::new(Mutex::new(Vec::new())),
            fallback,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn post(&self, _url: &str, _payload: &serde_json::Value) -> AttemptResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            self.fallback.clone()
        } else {
            script.remove(0)
        }
    }
}
