//! # Stock Movement Repository
//!
//! Pending stock movements. One per sale line, plus restocks on void/return.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use tally_core::PendingStockMovement;

const MOVEMENT_COLUMNS: &str = r#"
    local_id, server_id, sale_local_id, branch_id, user_id, product_id,
    movement_type, quantity, quantity_before, quantity_after,
    sync_status, sync_error, local_created_at, synced_at
"#;

#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    pub async fn insert(conn: &mut SqliteConnection, m: &PendingStockMovement) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_stock_movements (
                local_id, server_id, sale_local_id, branch_id, user_id, product_id,
                movement_type, quantity, quantity_before, quantity_after,
                sync_status, sync_error, local_created_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&m.local_id)
        .bind(&m.server_id)
        .bind(&m.sale_local_id)
        .bind(&m.branch_id)
        .bind(&m.user_id)
        .bind(&m.product_id)
        .bind(m.movement_type)
        .bind(m.quantity)
        .bind(m.quantity_before)
        .bind(m.quantity_after)
        .bind(m.sync_status)
        .bind(&m.sync_error)
        .bind(m.local_created_at)
        .bind(m.synced_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get(&self, local_id: &str) -> DbResult<Option<PendingStockMovement>> {
        let movement = sqlx::query_as::<_, PendingStockMovement>(&format!(
            "SELECT {} FROM pending_stock_movements WHERE local_id = ?1",
            MOVEMENT_COLUMNS
        ))
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movement)
    }

    /// Movements caused by one sale, oldest first.
    pub async fn list_for_sale(&self, sale_local_id: &str) -> DbResult<Vec<PendingStockMovement>> {
        let movements = sqlx::query_as::<_, PendingStockMovement>(&format!(
            "SELECT {} FROM pending_stock_movements WHERE sale_local_id = ?1 \
             ORDER BY local_created_at ASC, rowid ASC",
            MOVEMENT_COLUMNS
        ))
        .bind(sale_local_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements of one product, oldest first. Consecutive rows chain
    /// `quantity_after` into the next `quantity_before`.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<PendingStockMovement>> {
        let movements = sqlx::query_as::<_, PendingStockMovement>(&format!(
            "SELECT {} FROM pending_stock_movements WHERE product_id = ?1 \
             ORDER BY local_created_at ASC, rowid ASC",
            MOVEMENT_COLUMNS
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }
}
