//! # Register Operation Repository
//!
//! Pending open/close/cash-drop/withdrawal events.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use tally_core::PendingRegisterOperation;

const OPERATION_COLUMNS: &str = r#"
    local_id, server_id, branch_id, register_id, session_id, user_id,
    operation_type, amount_cents, declared_cash_cents, declared_card_cents,
    declared_other_cents, notes, sync_status, sync_error, local_created_at, synced_at
"#;

#[derive(Debug, Clone)]
pub struct RegisterRepository {
    pool: SqlitePool,
}

impl RegisterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RegisterRepository { pool }
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        op: &PendingRegisterOperation,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_register_operations (
                local_id, server_id, branch_id, register_id, session_id, user_id,
                operation_type, amount_cents, declared_cash_cents, declared_card_cents,
                declared_other_cents, notes, sync_status, sync_error, local_created_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&op.local_id)
        .bind(&op.server_id)
        .bind(&op.branch_id)
        .bind(&op.register_id)
        .bind(&op.session_id)
        .bind(&op.user_id)
        .bind(op.operation_type)
        .bind(op.amount_cents)
        .bind(op.declared_cash_cents)
        .bind(op.declared_card_cents)
        .bind(op.declared_other_cents)
        .bind(&op.notes)
        .bind(op.sync_status)
        .bind(&op.sync_error)
        .bind(op.local_created_at)
        .bind(op.synced_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get(&self, local_id: &str) -> DbResult<Option<PendingRegisterOperation>> {
        let op = sqlx::query_as::<_, PendingRegisterOperation>(&format!(
            "SELECT {} FROM pending_register_operations WHERE local_id = ?1",
            OPERATION_COLUMNS
        ))
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(op)
    }

    /// Operations of one cash session, oldest first.
    pub async fn list_for_session(
        &self,
        session_id: &str,
    ) -> DbResult<Vec<PendingRegisterOperation>> {
        let ops = sqlx::query_as::<_, PendingRegisterOperation>(&format!(
            "SELECT {} FROM pending_register_operations WHERE session_id = ?1 \
             ORDER BY local_created_at ASC, rowid ASC",
            OPERATION_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ops)
    }
}
