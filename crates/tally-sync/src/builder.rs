//! # Offline Transaction Builder
//!
//! Turns an in-memory cart into a complete, queued sale without talking to
//! the server.
//!
//! ## Build Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     OfflineSaleBuilder::build_sale                      │
//! │                                                                         │
//! │  validate context ──► cached customer balances ──► settle()            │
//! │        │                                              │                 │
//! │        │                    InsufficientPayment ◄─────┤ (nothing written)
//! │        ▼                                              ▼                 │
//! │  ┌──────────────── ONE IMMEDIATE TRANSACTION ───────────────────────┐  │
//! │  │ INSERT pending_sales                                             │  │
//! │  │ INSERT pending_sale_items × N, pending_sale_payments × M         │  │
//! │  │ per line:                                                        │  │
//! │  │   before = cached stock        (None if never downloaded)        │  │
//! │  │   UPDATE stock = MAX(stock − qty, 0) RETURNING after             │  │
//! │  │   INSERT pending_stock_movements                                 │  │
//! │  │ enqueue SALE (full nested payload)                               │  │
//! │  │ enqueue STOCK_MOVEMENT × N                                       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  A crash before COMMIT leaves no trace; the caller retries the whole   │
//! │  operation.                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reversals
//! `void_sale` and `return_sale` restock every line and keep exactly one
//! live queue item per sale: a not-yet-sent snapshot is replaced in place,
//! an already synced sale gets a fresh UPDATE item.
//!
//! Every write path opens its transaction with `BEGIN IMMEDIATE`, so two
//! builds against the same file serialize on the write lock instead of
//! failing when the second one upgrades from a stale read.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use tally_core::checkout::settle;
use tally_core::validation::{validate_non_negative, validate_payment_amount, validate_required};
use tally_core::{
    new_local_id, Cart, CheckoutPolicy, CoreError, CustomerBalances, EntitySyncStatus,
    EntityType, LoyaltyRequest, MovementType, PaymentInput, PendingRegisterOperation,
    PendingSale, PendingSaleItem, PendingSalePayment, PendingStockMovement, QueueStatus,
    RegisterOperationType, SalePayload, SaleStatus, SyncOperation, SyncPayload, SyncQueueItem,
    TerminalContext,
};
use tally_db::{
    CacheRepository, Database, DbError, QueueRepository, RegisterRepository, SaleRepository,
    StockRepository,
};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Results
// =============================================================================

/// Everything a build or reversal wrote.
#[derive(Debug, Clone)]
pub struct BuiltSale {
    pub payload: SalePayload,
    /// Movements written by this operation.
    pub movements: Vec<PendingStockMovement>,
    /// Queue items created or refreshed by this operation, sale first.
    pub queue_items: Vec<SyncQueueItem>,
}

impl BuiltSale {
    pub fn local_id(&self) -> &str {
        &self.payload.sale.local_id
    }
}

/// Register cash event as entered at the terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOperationInput {
    pub operation_type: Option<RegisterOperationType>,
    pub amount_cents: i64,
    pub declared_cash_cents: i64,
    pub declared_card_cents: i64,
    pub declared_other_cents: i64,
    pub notes: Option<String>,
}

impl RegisterOperationInput {
    pub fn new(operation_type: RegisterOperationType) -> Self {
        RegisterOperationInput {
            operation_type: Some(operation_type),
            ..Default::default()
        }
    }

    pub fn amount(mut self, cents: i64) -> Self {
        self.amount_cents = cents;
        self
    }

    pub fn declared(mut self, cash_cents: i64, card_cents: i64, other_cents: i64) -> Self {
        self.declared_cash_cents = cash_cents;
        self.declared_card_cents = card_cents;
        self.declared_other_cents = other_cents;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Clone)]
pub struct OfflineSaleBuilder {
    db: Database,
    policy: CheckoutPolicy,
}

impl OfflineSaleBuilder {
    pub fn new(db: Database, policy: CheckoutPolicy) -> Self {
        OfflineSaleBuilder { db, policy }
    }

    /// Builds, persists and queues a completed sale.
    ///
    /// Fails fast, before any write, when validation or settlement fails.
    pub async fn build_sale(
        &self,
        ctx: &TerminalContext,
        cart: &Cart,
        payments: &[PaymentInput],
        loyalty: &LoyaltyRequest,
    ) -> SyncResult<BuiltSale> {
        validate_context(ctx)?;

        let balances = match &cart.customer_id {
            Some(customer_id) => match self.db.cache().get_customer(customer_id).await? {
                Some(c) => CustomerBalances {
                    loyalty_points: Some(c.loyalty_points),
                    credit_balance_cents: Some(c.credit_balance_cents),
                },
                None => {
                    debug!(customer_id = %customer_id, "Customer not cached, balances unchecked");
                    CustomerBalances::default()
                }
            },
            None => CustomerBalances::default(),
        };

        let settlement = settle(cart, payments, loyalty, balances, &self.policy)?;

        let now = Utc::now();
        let local_id = new_local_id();

        let sale = PendingSale {
            local_id: local_id.clone(),
            server_id: None,
            branch_id: ctx.branch_id.clone(),
            register_id: ctx.register_id.clone(),
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            customer_id: cart.customer_id.clone(),
            subtotal_cents: settlement.subtotal_cents,
            discount_cents: settlement.discount_cents,
            tax_cents: settlement.tax_cents,
            total_cents: settlement.total_cents,
            points_earned: settlement.points_earned,
            points_redeemed: settlement.points_redeemed,
            points_value_cents: settlement.points_value_cents,
            credit_used_cents: settlement.credit_used_cents,
            credit_granted_cents: settlement.credit_granted_cents,
            amount_paid_cents: settlement.amount_paid_cents,
            change_cents: settlement.change_cents,
            status: SaleStatus::Completed,
            sync_status: EntitySyncStatus::Pending,
            sync_error: None,
            local_created_at: now,
            updated_at: now,
            synced_at: None,
        };

        let items: Vec<PendingSaleItem> = cart
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| PendingSaleItem {
                local_id: new_local_id(),
                sale_local_id: local_id.clone(),
                line_no: i as i64 + 1,
                product_id: line.product_id.clone(),
                sku: line.sku.clone(),
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                discount_cents: line.discount_cents,
                tax_cents: line.tax_cents,
                line_total_cents: line.line_total_cents,
            })
            .collect();

        let sale_payments: Vec<PendingSalePayment> = payments
            .iter()
            .enumerate()
            .map(|(i, p)| PendingSalePayment {
                local_id: new_local_id(),
                sale_local_id: local_id.clone(),
                line_no: i as i64 + 1,
                payment_method_id: p.payment_method_id.clone(),
                amount_cents: p.amount_cents,
                reference: p.reference.clone(),
            })
            .collect();

        let payload = SalePayload {
            sale,
            items,
            payments: sale_payments,
        };

        let mut tx = self.db.begin_immediate().await?;

        SaleRepository::insert_sale(&mut tx, &payload.sale).await?;
        for item in &payload.items {
            SaleRepository::insert_item(&mut tx, item).await?;
        }
        for payment in &payload.payments {
            SaleRepository::insert_payment(&mut tx, payment).await?;
        }

        let mut movements = Vec::with_capacity(payload.items.len());
        for item in &payload.items {
            let movement = apply_movement(
                &mut tx,
                ctx,
                &local_id,
                &item.product_id,
                MovementType::Sale,
                item.quantity,
            )
            .await?;
            movements.push(movement);
        }

        let mut queue_items = Vec::with_capacity(movements.len() + 1);
        let sale_payload = SyncPayload::Sale(payload.clone());
        queue_items
            .push(QueueRepository::enqueue(&mut tx, &sale_payload, SyncOperation::Insert).await?);
        for movement in &movements {
            let item =
                QueueRepository::enqueue(&mut tx, &movement.clone().into(), SyncOperation::Insert)
                    .await?;
            queue_items.push(item);
        }

        tx.commit().await?;

        info!(
            local_id = %local_id,
            total_cents = payload.sale.total_cents,
            lines = payload.items.len(),
            queued = queue_items.len(),
            "Offline sale recorded"
        );

        Ok(BuiltSale {
            payload,
            movements,
            queue_items,
        })
    }

    /// Records a register cash event and queues it, atomically.
    pub async fn record_register_operation(
        &self,
        ctx: &TerminalContext,
        input: RegisterOperationInput,
    ) -> SyncResult<(PendingRegisterOperation, SyncQueueItem)> {
        validate_context(ctx)?;

        let operation_type = input.operation_type.ok_or_else(|| {
            CoreError::from(tally_core::ValidationError::Required {
                field: "operation_type".to_string(),
            })
        })?;

        match operation_type {
            RegisterOperationType::CashDrop | RegisterOperationType::Withdrawal => {
                validate_payment_amount(input.amount_cents).map_err(CoreError::from)?;
            }
            RegisterOperationType::Open | RegisterOperationType::Close => {
                validate_non_negative("amount", input.amount_cents).map_err(CoreError::from)?;
            }
        }
        validate_non_negative("declared cash", input.declared_cash_cents)
            .map_err(CoreError::from)?;
        validate_non_negative("declared card", input.declared_card_cents)
            .map_err(CoreError::from)?;
        validate_non_negative("declared other", input.declared_other_cents)
            .map_err(CoreError::from)?;

        let op = PendingRegisterOperation {
            local_id: new_local_id(),
            server_id: None,
            branch_id: ctx.branch_id.clone(),
            register_id: ctx.register_id.clone(),
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            operation_type,
            amount_cents: input.amount_cents,
            declared_cash_cents: input.declared_cash_cents,
            declared_card_cents: input.declared_card_cents,
            declared_other_cents: input.declared_other_cents,
            notes: input.notes,
            sync_status: EntitySyncStatus::Pending,
            sync_error: None,
            local_created_at: Utc::now(),
            synced_at: None,
        };

        let mut tx = self.db.begin_immediate().await?;
        RegisterRepository::insert(&mut tx, &op).await?;
        let item =
            QueueRepository::enqueue(&mut tx, &op.clone().into(), SyncOperation::Insert).await?;
        tx.commit().await?;

        info!(
            local_id = %op.local_id,
            operation = %op.operation_type,
            amount_cents = op.amount_cents,
            "Register operation recorded"
        );

        Ok((op, item))
    }

    /// Voids a completed sale and restocks its lines.
    pub async fn void_sale(&self, ctx: &TerminalContext, local_id: &str) -> SyncResult<BuiltSale> {
        self.reverse_sale(ctx, local_id, SaleStatus::Voided, MovementType::VoidRestock)
            .await
    }

    /// Returns a completed sale in full and restocks its lines.
    pub async fn return_sale(
        &self,
        ctx: &TerminalContext,
        local_id: &str,
    ) -> SyncResult<BuiltSale> {
        self.reverse_sale(ctx, local_id, SaleStatus::Returned, MovementType::ReturnRestock)
            .await
    }

    async fn reverse_sale(
        &self,
        ctx: &TerminalContext,
        local_id: &str,
        new_status: SaleStatus,
        movement_type: MovementType,
    ) -> SyncResult<BuiltSale> {
        validate_context(ctx)?;

        let mut tx = self.db.begin_immediate().await?;

        let record = SaleRepository::get_record_in(&mut tx, local_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", local_id))?;

        if !record.sale.can_reverse() {
            return Err(CoreError::InvalidSaleStatus {
                local_id: local_id.to_string(),
                current_status: record.sale.status.to_string(),
                action: format!("mark {}", new_status),
            }
            .into());
        }

        let live = QueueRepository::pending_for_entity(&mut tx, EntityType::Sale, local_id).await?;
        if let Some(item) = &live {
            if matches!(item.status, QueueStatus::Processing | QueueStatus::Conflict) {
                return Err(SyncError::SaleLocked {
                    local_id: local_id.to_string(),
                    queue_status: item.status.to_string(),
                });
            }
        }

        let now = Utc::now();
        SaleRepository::set_lifecycle_status(&mut tx, local_id, new_status, now).await?;

        let mut movements = Vec::with_capacity(record.items.len());
        for item in &record.items {
            let movement = apply_movement(
                &mut tx,
                ctx,
                local_id,
                &item.product_id,
                movement_type,
                item.quantity,
            )
            .await?;
            movements.push(movement);
        }

        let mut payload = SaleRepository::get_record_in(&mut tx, local_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", local_id))?;

        let mut queue_items = Vec::with_capacity(movements.len() + 1);
        match live {
            Some(item) => {
                QueueRepository::replace_payload(&mut tx, &item.id, &payload.clone().into())
                    .await?;
                let refreshed = QueueRepository::get_in(&mut tx, &item.id)
                    .await?
                    .ok_or_else(|| DbError::not_found("Queue item", &item.id))?;
                queue_items.push(refreshed);
            }
            None => {
                payload.sale.sync_status = EntitySyncStatus::Pending;
                payload.sale.sync_error = None;
                let item = QueueRepository::enqueue(
                    &mut tx,
                    &payload.clone().into(),
                    SyncOperation::Update,
                )
                .await?;
                queue_items.push(item);
            }
        }

        for movement in &movements {
            let item =
                QueueRepository::enqueue(&mut tx, &movement.clone().into(), SyncOperation::Insert)
                    .await?;
            queue_items.push(item);
        }

        tx.commit().await?;

        info!(
            local_id = %local_id,
            status = %new_status,
            restocked_lines = movements.len(),
            "Sale reversed"
        );

        Ok(BuiltSale {
            payload,
            movements,
            queue_items,
        })
    }
}

fn validate_context(ctx: &TerminalContext) -> SyncResult<()> {
    validate_required("user_id", &ctx.user_id).map_err(CoreError::from)?;
    validate_required("branch_id", &ctx.branch_id).map_err(CoreError::from)?;
    validate_required("register_id", &ctx.register_id).map_err(CoreError::from)?;
    Ok(())
}

/// Writes one stock movement and moves the cached stock projection with it.
///
/// An uncached product still gets a movement, without before/after and
/// without touching the cache; the server settles the real stock level.
async fn apply_movement(
    conn: &mut SqliteConnection,
    ctx: &TerminalContext,
    sale_local_id: &str,
    product_id: &str,
    movement_type: MovementType,
    quantity: i64,
) -> SyncResult<PendingStockMovement> {
    let delta = movement_type.direction() * quantity;
    let (before, after) = match CacheRepository::adjust_stock(conn, product_id, delta).await? {
        Some((before, after)) => (Some(before), Some(after)),
        None => {
            warn!(
                product_id = %product_id,
                sale_local_id = %sale_local_id,
                "Product not cached, stock not adjusted locally"
            );
            (None, None)
        }
    };

    let movement = PendingStockMovement {
        local_id: new_local_id(),
        server_id: None,
        sale_local_id: Some(sale_local_id.to_string()),
        branch_id: ctx.branch_id.clone(),
        user_id: ctx.user_id.clone(),
        product_id: product_id.to_string(),
        movement_type,
        quantity,
        quantity_before: before,
        quantity_after: after,
        sync_status: EntitySyncStatus::Pending,
        sync_error: None,
        local_created_at: Utc::now(),
        synced_at: None,
    };

    StockRepository::insert(conn, &movement).await?;
    Ok(movement)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cash, context, line, product, seed_products, test_db};
    use tally_core::CachedCustomer;
    use tally_db::DbConfig;

    fn builder(db: &Database) -> OfflineSaleBuilder {
        OfflineSaleBuilder::new(db.clone(), CheckoutPolicy::default())
    }

    fn cart(lines: Vec<tally_core::CartLine>) -> Cart {
        Cart {
            lines,
            discount_cents: 0,
            customer_id: None,
        }
    }

    #[tokio::test]
    async fn test_offline_sale_writes_everything_and_queues_per_aggregate() {
        let db = test_db().await;
        seed_products(&db, &[product("p-1", 10), product("p-2", 5)]).await;

        let built = builder(&db)
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 2, 250), line("p-2", 1, 400)]),
                &[cash(1000)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();

        assert_eq!(built.payload.sale.total_cents, 900);
        assert_eq!(built.payload.sale.change_cents, 100);
        assert_eq!(built.queue_items.len(), 3);
        assert_eq!(built.queue_items[0].entity_type, EntityType::Sale);

        let counts = db.queue().count_by_status().await.unwrap();
        assert_eq!(counts.pending, 3);

        let stored = db.sales().get_record(built.local_id()).await.unwrap().unwrap();
        assert_eq!(stored.items.len(), 2);
        assert_eq!(stored.payments.len(), 1);
        assert_eq!(stored.sale.sync_status, EntitySyncStatus::Pending);

        assert_eq!(db.cache().get_product("p-1").await.unwrap().unwrap().stock_quantity, 8);
        assert_eq!(db.cache().get_product("p-2").await.unwrap().unwrap().stock_quantity, 4);

        let movements = db.stock().list_for_sale(built.local_id()).await.unwrap();
        assert_eq!(movements.len(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_payment_writes_nothing() {
        let db = test_db().await;
        seed_products(&db, &[product("p-1", 10)]).await;

        let err = builder(&db)
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 2, 250)]),
                &[cash(400)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Core(CoreError::InsufficientPayment {
                due_cents: 500,
                paid_cents: 400
            })
        ));
        assert_eq!(db.queue().count_by_status().await.unwrap().outstanding(), 0);
        assert_eq!(db.cache().get_product("p-1").await.unwrap().unwrap().stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_performing_user_is_required() {
        let db = test_db().await;
        let mut ctx = context();
        ctx.user_id = " ".into();

        let err = builder(&db)
            .build_sale(
                &ctx,
                &cart(vec![line("p-1", 1, 250)]),
                &[cash(250)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stock_projection_chains_across_sales() {
        let db = test_db().await;
        seed_products(&db, &[product("p-1", 10)]).await;
        let builder = builder(&db);

        for qty in [2, 3, 4] {
            builder
                .build_sale(
                    &context(),
                    &cart(vec![line("p-1", qty, 100)]),
                    &[cash(qty * 100)],
                    &LoyaltyRequest::default(),
                )
                .await
                .unwrap();
        }

        assert_eq!(db.cache().get_product("p-1").await.unwrap().unwrap().stock_quantity, 1);

        let movements = db.stock().list_for_product("p-1").await.unwrap();
        assert_eq!(movements.len(), 3);
        assert_eq!(movements[0].quantity_before, Some(10));
        for pair in movements.windows(2) {
            assert_eq!(pair[0].quantity_after, pair[1].quantity_before);
        }
        assert_eq!(movements[2].quantity_after, Some(1));

        // Overselling floors at zero
        builder
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 5, 100)]),
                &[cash(500)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(db.cache().get_product("p-1").await.unwrap().unwrap().stock_quantity, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_builds_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("tally.db")))
            .await
            .unwrap();
        seed_products(&db, &[product("p-1", 10)]).await;

        let builds: Vec<_> = (0..8)
            .map(|_| {
                let builder = builder(&db);
                tokio::spawn(async move {
                    builder
                        .build_sale(
                            &context(),
                            &cart(vec![line("p-1", 1, 100)]),
                            &[cash(100)],
                            &LoyaltyRequest::default(),
                        )
                        .await
                })
            })
            .collect();
        for build in builds {
            build.await.unwrap().unwrap();
        }

        assert_eq!(db.cache().get_product("p-1").await.unwrap().unwrap().stock_quantity, 2);
        assert_eq!(db.sales().count_by_sync_status().await.unwrap().pending, 8);

        // Each build saw the previous one's write: befores are 10, 9, ... 3
        let mut chain: Vec<_> = db
            .stock()
            .list_for_product("p-1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.quantity_before.unwrap(), m.quantity_after.unwrap()))
            .collect();
        chain.sort_unstable_by(|a, b| b.cmp(a));
        let expected: Vec<_> = (3..=10).rev().map(|q| (q, q - 1)).collect();
        assert_eq!(chain, expected);

        db.close().await;
    }

    #[tokio::test]
    async fn test_uncached_product_still_sells() {
        let db = test_db().await;

        let built = builder(&db)
            .build_sale(
                &context(),
                &cart(vec![line("ghost", 1, 250)]),
                &[cash(250)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();

        assert_eq!(built.queue_items.len(), 2);
        assert_eq!(built.movements[0].quantity_before, None);
        assert_eq!(built.movements[0].quantity_after, None);
        assert!(db.cache().get_product("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_customer_caps_redemption() {
        let db = test_db().await;
        seed_products(&db, &[product("p-1", 10)]).await;
        let customer = CachedCustomer {
            id: "c-1".into(),
            name: "Ada".into(),
            email: None,
            phone: None,
            loyalty_points: 100,
            credit_balance_cents: 0,
            is_active: true,
            cached_at: Utc::now(),
        };
        let mut tx = db.begin().await.unwrap();
        CacheRepository::upsert_customers(&mut tx, &[customer]).await.unwrap();
        tx.commit().await.unwrap();

        let mut cart = cart(vec![line("p-1", 2, 250)]);
        cart.customer_id = Some("c-1".into());
        let loyalty = LoyaltyRequest {
            points_to_redeem: 500,
            ..Default::default()
        };

        let built = builder(&db)
            .build_sale(&context(), &cart, &[cash(400)], &loyalty)
            .await
            .unwrap();

        assert_eq!(built.payload.sale.points_redeemed, 100);
        assert_eq!(built.payload.sale.points_value_cents, 100);
        assert_eq!(built.payload.sale.change_cents, 0);
    }

    #[tokio::test]
    async fn test_void_before_push_replaces_snapshot() {
        let db = test_db().await;
        seed_products(&db, &[product("p-1", 10)]).await;
        let builder = builder(&db);
        let built = builder
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 3, 100)]),
                &[cash(300)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();

        let voided = builder.void_sale(&context(), built.local_id()).await.unwrap();

        assert_eq!(voided.payload.sale.status, SaleStatus::Voided);
        assert_eq!(voided.queue_items[0].id, built.queue_items[0].id);

        let sale_items = db
            .queue()
            .list_for_entity(EntityType::Sale, built.local_id())
            .await
            .unwrap();
        assert_eq!(sale_items.len(), 1);
        match SyncPayload::decode(EntityType::Sale, &sale_items[0].payload).unwrap() {
            SyncPayload::Sale(p) => assert_eq!(p.sale.status, SaleStatus::Voided),
            other => panic!("unexpected payload {:?}", other),
        }

        assert_eq!(db.cache().get_product("p-1").await.unwrap().unwrap().stock_quantity, 10);
        let movements = db.stock().list_for_sale(built.local_id()).await.unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[1].movement_type, MovementType::VoidRestock);
        assert_eq!(movements[1].quantity_before, Some(7));
    }

    #[tokio::test]
    async fn test_return_after_sync_enqueues_update() {
        let db = test_db().await;
        seed_products(&db, &[product("p-1", 10)]).await;
        let builder = builder(&db);
        let built = builder
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 1, 100)]),
                &[cash(100)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();

        let claimed = db.queue().claim_pending(10).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        for item in &claimed {
            QueueRepository::mark_synced(&mut tx, item, Utc::now(), None)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let returned = builder
            .return_sale(&context(), built.local_id())
            .await
            .unwrap();

        assert_eq!(returned.queue_items[0].operation, SyncOperation::Update);
        assert_eq!(returned.queue_items[0].status, QueueStatus::Pending);

        let sale = db.sales().get(built.local_id()).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Returned);
        assert_eq!(sale.sync_status, EntitySyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_sale_in_flight_cannot_be_voided() {
        let db = test_db().await;
        let builder = builder(&db);
        let built = builder
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 1, 100)]),
                &[cash(100)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();
        db.queue().claim_pending(10).await.unwrap();

        let err = builder
            .void_sale(&context(), built.local_id())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SaleLocked { .. }));

        let sale = db.sales().get(built.local_id()).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
    }

    #[tokio::test]
    async fn test_void_twice_is_rejected() {
        let db = test_db().await;
        let builder = builder(&db);
        let built = builder
            .build_sale(
                &context(),
                &cart(vec![line("p-1", 1, 100)]),
                &[cash(100)],
                &LoyaltyRequest::default(),
            )
            .await
            .unwrap();

        builder.void_sale(&context(), built.local_id()).await.unwrap();
        let err = builder
            .void_sale(&context(), built.local_id())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::InvalidSaleStatus { .. })));
    }

    #[tokio::test]
    async fn test_register_operation_is_queued() {
        let db = test_db().await;
        let builder = builder(&db);

        let (op, item) = builder
            .record_register_operation(
                &context(),
                RegisterOperationInput::new(RegisterOperationType::CashDrop)
                    .amount(5000)
                    .notes("mid-shift drop"),
            )
            .await
            .unwrap();

        assert_eq!(item.entity_type, EntityType::RegisterOperation);
        assert_eq!(item.local_id, op.local_id);
        let stored = db.registers().get(&op.local_id).await.unwrap().unwrap();
        assert_eq!(stored.amount_cents, 5000);

        let err = builder
            .record_register_operation(
                &context(),
                RegisterOperationInput::new(RegisterOperationType::Withdrawal),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::Validation(_))));
    }
}
