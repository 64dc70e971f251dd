//! Test doubles and fixtures shared by the engine's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tally_core::{
    CachedProduct, CartLine, EntityType, PaymentInput, TerminalContext,
};
use tally_db::{CacheRepository, Database, DbConfig};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    PullData, PullRequest, PullResponse, PushRequest, PushResponse, ResolutionResponse,
    ResolutionSubmission,
};
use crate::transport::SyncTransport;

// =============================================================================
// Stub Transport
// =============================================================================

/// What the stub server does with the next push.
pub(crate) enum PushScript {
    /// Upsert every item and acknowledge all of them.
    Accept,
    /// Upsert every item not listed as a conflict or error, then return this.
    Respond(PushResponse),
    /// Fail with an HTTP status before applying anything.
    Status(u16),
    /// Connection refused before applying anything.
    Disconnect,
    /// Apply everything, then lose the response on the way back.
    LoseResponse,
    /// Hang for this long, then accept.
    Stall(Duration),
}

pub(crate) enum PullScript {
    Respond(PullResponse),
    Disconnect,
    Stall(Duration),
}

/// In-process server that upserts pushed items by `(entity_type, local_id)`.
///
/// Unscripted pushes are accepted; unscripted pulls return no changes.
pub(crate) struct StubTransport {
    pub server_time: DateTime<Utc>,
    push_script: Mutex<VecDeque<PushScript>>,
    pull_script: Mutex<VecDeque<PullScript>>,
    pub pushes: Mutex<Vec<PushRequest>>,
    pub pulls: Mutex<Vec<PullRequest>>,
    pub resolutions: Mutex<Vec<ResolutionSubmission>>,
    applied: Mutex<HashMap<(EntityType, String), Value>>,
    apply_calls: Mutex<usize>,
}

impl StubTransport {
    pub fn new() -> Self {
        StubTransport {
            server_time: server_time(),
            push_script: Mutex::new(VecDeque::new()),
            pull_script: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            resolutions: Mutex::new(Vec::new()),
            applied: Mutex::new(HashMap::new()),
            apply_calls: Mutex::new(0),
        }
    }

    pub fn script_push(&self, script: PushScript) {
        self.push_script.lock().unwrap().push_back(script);
    }

    pub fn script_pull(&self, script: PullScript) {
        self.pull_script.lock().unwrap().push_back(script);
    }

    /// Distinct records the server holds.
    pub fn server_records(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    /// Item writes the server performed, including repeats.
    pub fn server_writes(&self) -> usize {
        *self.apply_calls.lock().unwrap()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    fn apply(&self, request: &PushRequest, response: Option<&PushResponse>) {
        let mut applied = self.applied.lock().unwrap();
        let mut calls = self.apply_calls.lock().unwrap();
        for item in &request.items {
            if let Some(response) = response {
                if response.conflict_for(item.entity_type, &item.local_id).is_some()
                    || response.error_for(item.entity_type, &item.local_id).is_some()
                {
                    continue;
                }
            }
            applied.insert((item.entity_type, item.local_id.clone()), item.data.clone());
            *calls += 1;
        }
    }

    fn accept(&self, request: &PushRequest) -> PushResponse {
        self.apply(request, None);
        PushResponse::accepted(request.items.len() as i64, self.server_time)
    }
}

#[async_trait]
impl SyncTransport for StubTransport {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.pushes.lock().unwrap().push(request.clone());
        let script = self.push_script.lock().unwrap().pop_front();

        match script.unwrap_or(PushScript::Accept) {
            PushScript::Accept => Ok(self.accept(request)),
            PushScript::Respond(response) => {
                self.apply(request, Some(&response));
                Ok(response)
            }
            PushScript::Status(status) => Err(SyncError::HttpStatus {
                status,
                message: "stub failure".into(),
            }),
            PushScript::Disconnect => Err(SyncError::ConnectionFailed("stub offline".into())),
            PushScript::LoseResponse => {
                self.apply(request, None);
                Err(SyncError::ConnectionFailed("connection reset".into()))
            }
            PushScript::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Ok(self.accept(request))
            }
        }
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.pulls.lock().unwrap().push(request.clone());
        let script = self.pull_script.lock().unwrap().pop_front();

        match script {
            Some(PullScript::Respond(response)) => Ok(response),
            Some(PullScript::Disconnect) => Err(SyncError::ConnectionFailed("stub offline".into())),
            Some(PullScript::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(empty_pull(self.server_time))
            }
            None => Ok(empty_pull(self.server_time)),
        }
    }

    async fn resolve(&self, submission: &ResolutionSubmission) -> SyncResult<ResolutionResponse> {
        self.resolutions.lock().unwrap().push(submission.clone());
        Ok(ResolutionResponse {
            success: true,
            message: None,
        })
    }
}

pub(crate) fn empty_pull(server_time: DateTime<Utc>) -> PullResponse {
    PullResponse {
        success: true,
        data: PullData::default(),
        server_time,
        message: None,
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub(crate) fn server_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub(crate) fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.terminal.branch_id = "branch-1".into();
    config.terminal.register_id = "register-1".into();
    config.server.request_timeout_secs = 1;
    config
}

pub(crate) fn context() -> TerminalContext {
    TerminalContext {
        branch_id: "branch-1".into(),
        register_id: "register-1".into(),
        session_id: Some("session-1".into()),
        user_id: "cashier-7".into(),
    }
}

pub(crate) fn product(id: &str, stock: i64) -> CachedProduct {
    CachedProduct {
        id: id.to_string(),
        sku: id.to_uppercase(),
        barcode: None,
        name: format!("Product {}", id),
        price_cents: 250,
        tax_rate_bps: 0,
        category_id: None,
        track_inventory: true,
        stock_quantity: stock,
        is_active: true,
        cached_at: Utc::now(),
    }
}

pub(crate) async fn seed_products(db: &Database, products: &[CachedProduct]) {
    let mut tx = db.begin().await.unwrap();
    CacheRepository::upsert_products(&mut tx, products).await.unwrap();
    tx.commit().await.unwrap();
}

/// A line with no discount or tax, total = price × quantity.
pub(crate) fn line(product_id: &str, quantity: i64, unit_price_cents: i64) -> CartLine {
    CartLine {
        product_id: product_id.to_string(),
        sku: product_id.to_uppercase(),
        name: format!("Product {}", product_id),
        quantity,
        unit_price_cents,
        discount_cents: 0,
        tax_cents: 0,
        line_total_cents: unit_price_cents * quantity,
    }
}

pub(crate) fn cash(amount_cents: i64) -> PaymentInput {
    PaymentInput {
        payment_method_id: "cash".to_string(),
        amount_cents,
        reference: None,
    }
}
