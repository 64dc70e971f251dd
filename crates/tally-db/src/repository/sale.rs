//! # Sale Repository
//!
//! Pending sales with their items and payments, keyed by local id.
//!
//! ## Aggregate Shape
//! ```text
//! pending_sales (local_id) ─┬─< pending_sale_items    (sale_local_id, line_no)
//!                           └─< pending_sale_payments (sale_local_id, line_no)
//! ```
//!
//! Items and payments are immutable once written; only the sale's lifecycle
//! status, sync status and server id ever change.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use tally_core::{
    EntitySyncStatus, PendingSale, PendingSaleItem, PendingSalePayment, SalePayload,
    SaleStatus, SaleSyncCounts,
};

const SALE_COLUMNS: &str = r#"
    local_id, server_id, branch_id, register_id, session_id, user_id, customer_id,
    subtotal_cents, discount_cents, tax_cents, total_cents,
    points_earned, points_redeemed, points_value_cents,
    credit_used_cents, credit_granted_cents, amount_paid_cents, change_cents,
    status, sync_status, sync_error, local_created_at, updated_at, synced_at
"#;

#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Inserts
    // =========================================================================

    pub async fn insert_sale(conn: &mut SqliteConnection, sale: &PendingSale) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_sales (
                local_id, server_id, branch_id, register_id, session_id, user_id, customer_id,
                subtotal_cents, discount_cents, tax_cents, total_cents,
                points_earned, points_redeemed, points_value_cents,
                credit_used_cents, credit_granted_cents, amount_paid_cents, change_cents,
                status, sync_status, sync_error, local_created_at, updated_at, synced_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11,
                ?12, ?13, ?14,
                ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23, ?24
            )
            "#,
        )
        .bind(&sale.local_id)
        .bind(&sale.server_id)
        .bind(&sale.branch_id)
        .bind(&sale.register_id)
        .bind(&sale.session_id)
        .bind(&sale.user_id)
        .bind(&sale.customer_id)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(sale.points_earned)
        .bind(sale.points_redeemed)
        .bind(sale.points_value_cents)
        .bind(sale.credit_used_cents)
        .bind(sale.credit_granted_cents)
        .bind(sale.amount_paid_cents)
        .bind(sale.change_cents)
        .bind(sale.status)
        .bind(sale.sync_status)
        .bind(&sale.sync_error)
        .bind(sale.local_created_at)
        .bind(sale.updated_at)
        .bind(sale.synced_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn insert_item(conn: &mut SqliteConnection, item: &PendingSaleItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_sale_items (
                local_id, sale_local_id, line_no, product_id, sku, name,
                quantity, unit_price_cents, discount_cents, tax_cents, line_total_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&item.local_id)
        .bind(&item.sale_local_id)
        .bind(item.line_no)
        .bind(&item.product_id)
        .bind(&item.sku)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.discount_cents)
        .bind(item.tax_cents)
        .bind(item.line_total_cents)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn insert_payment(
        conn: &mut SqliteConnection,
        payment: &PendingSalePayment,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_sale_payments (
                local_id, sale_local_id, line_no, payment_method_id, amount_cents, reference
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&payment.local_id)
        .bind(&payment.sale_local_id)
        .bind(payment.line_no)
        .bind(&payment.payment_method_id)
        .bind(payment.amount_cents)
        .bind(&payment.reference)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, local_id: &str) -> DbResult<Option<PendingSale>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, local_id).await
    }

    pub async fn get_in(
        conn: &mut SqliteConnection,
        local_id: &str,
    ) -> DbResult<Option<PendingSale>> {
        let sale = sqlx::query_as::<_, PendingSale>(&format!(
            "SELECT {} FROM pending_sales WHERE local_id = ?1",
            SALE_COLUMNS
        ))
        .bind(local_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    /// Items in cart order.
    pub async fn get_items(&self, sale_local_id: &str) -> DbResult<Vec<PendingSaleItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::items_in(&mut conn, sale_local_id).await
    }

    async fn items_in(
        conn: &mut SqliteConnection,
        sale_local_id: &str,
    ) -> DbResult<Vec<PendingSaleItem>> {
        let items = sqlx::query_as::<_, PendingSaleItem>(
            r#"
            SELECT local_id, sale_local_id, line_no, product_id, sku, name,
                   quantity, unit_price_cents, discount_cents, tax_cents, line_total_cents
            FROM pending_sale_items
            WHERE sale_local_id = ?1
            ORDER BY line_no ASC
            "#,
        )
        .bind(sale_local_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    /// Payments in tender order.
    pub async fn get_payments(&self, sale_local_id: &str) -> DbResult<Vec<PendingSalePayment>> {
        let mut conn = self.pool.acquire().await?;
        Self::payments_in(&mut conn, sale_local_id).await
    }

    async fn payments_in(
        conn: &mut SqliteConnection,
        sale_local_id: &str,
    ) -> DbResult<Vec<PendingSalePayment>> {
        let payments = sqlx::query_as::<_, PendingSalePayment>(
            r#"
            SELECT local_id, sale_local_id, line_no, payment_method_id, amount_cents, reference
            FROM pending_sale_payments
            WHERE sale_local_id = ?1
            ORDER BY line_no ASC
            "#,
        )
        .bind(sale_local_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(payments)
    }

    /// The whole aggregate as it is snapshotted into the queue.
    pub async fn get_record(&self, local_id: &str) -> DbResult<Option<SalePayload>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_record_in(&mut conn, local_id).await
    }

    pub async fn get_record_in(
        conn: &mut SqliteConnection,
        local_id: &str,
    ) -> DbResult<Option<SalePayload>> {
        let Some(sale) = Self::get_in(conn, local_id).await? else {
            return Ok(None);
        };
        let items = Self::items_in(conn, local_id).await?;
        let payments = Self::payments_in(conn, local_id).await?;

        Ok(Some(SalePayload {
            sale,
            items,
            payments,
        }))
    }

    /// Most recent first.
    pub async fn list_by_sync_status(
        &self,
        status: EntitySyncStatus,
        limit: u32,
    ) -> DbResult<Vec<PendingSale>> {
        let sales = sqlx::query_as::<_, PendingSale>(&format!(
            "SELECT {} FROM pending_sales WHERE sync_status = ?1 \
             ORDER BY local_created_at DESC LIMIT ?2",
            SALE_COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }

    pub async fn count_by_sync_status(&self) -> DbResult<SaleSyncCounts> {
        let rows: Vec<(EntitySyncStatus, i64)> = sqlx::query_as(
            "SELECT sync_status, COUNT(*) FROM pending_sales GROUP BY sync_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = SaleSyncCounts::default();
        for (status, count) in rows {
            counts.set(status, count);
        }
        Ok(counts)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    pub async fn set_lifecycle_status(
        conn: &mut SqliteConnection,
        local_id: &str,
        status: SaleStatus,
        updated_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query("UPDATE pending_sales SET status = ?2, updated_at = ?3 WHERE local_id = ?1")
            .bind(local_id)
            .bind(status)
            .bind(updated_at)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}
