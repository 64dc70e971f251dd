//! # Cache Repository
//!
//! Cached reference rows: products, customers, payment methods, categories.
//!
//! ## Two Writers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Downloader (pull)                   Offline Transaction Builder        │
//! │       │                                    │                            │
//! │       │ upsert_products(rows)              │ adjust_stock(id, delta)    │
//! │       │  replaces every column             │  floors at zero            │
//! │       ▼                                    ▼                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     cached_products                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Last writer wins. A pull overwrites stock_quantity with server truth. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are never deleted by a pull: a pending sale may still reference them.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::{CachedCategory, CachedCustomer, CachedPaymentMethod, CachedProduct};

#[derive(Debug, Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}

impl CacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CacheRepository { pool }
    }

    // =========================================================================
    // Upserts (Downloader)
    // =========================================================================

    /// Replaces or inserts products by id, stamping `cached_at`.
    pub async fn upsert_products(
        conn: &mut SqliteConnection,
        products: &[CachedProduct],
    ) -> DbResult<usize> {
        let now = Utc::now();

        for p in products {
            sqlx::query(
                r#"
                INSERT INTO cached_products (
                    id, sku, barcode, name, price_cents, tax_rate_bps,
                    category_id, track_inventory, stock_quantity, is_active, cached_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    sku = excluded.sku,
                    barcode = excluded.barcode,
                    name = excluded.name,
                    price_cents = excluded.price_cents,
                    tax_rate_bps = excluded.tax_rate_bps,
                    category_id = excluded.category_id,
                    track_inventory = excluded.track_inventory,
                    stock_quantity = excluded.stock_quantity,
                    is_active = excluded.is_active,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&p.id)
            .bind(&p.sku)
            .bind(&p.barcode)
            .bind(&p.name)
            .bind(p.price_cents)
            .bind(p.tax_rate_bps)
            .bind(&p.category_id)
            .bind(p.track_inventory)
            .bind(p.stock_quantity)
            .bind(p.is_active)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        debug!(count = products.len(), "Cached products upserted");
        Ok(products.len())
    }

    pub async fn upsert_customers(
        conn: &mut SqliteConnection,
        customers: &[CachedCustomer],
    ) -> DbResult<usize> {
        let now = Utc::now();

        for c in customers {
            sqlx::query(
                r#"
                INSERT INTO cached_customers (
                    id, name, email, phone, loyalty_points,
                    credit_balance_cents, is_active, cached_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    phone = excluded.phone,
                    loyalty_points = excluded.loyalty_points,
                    credit_balance_cents = excluded.credit_balance_cents,
                    is_active = excluded.is_active,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&c.id)
            .bind(&c.name)
            .bind(&c.email)
            .bind(&c.phone)
            .bind(c.loyalty_points)
            .bind(c.credit_balance_cents)
            .bind(c.is_active)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        debug!(count = customers.len(), "Cached customers upserted");
        Ok(customers.len())
    }

    pub async fn upsert_payment_methods(
        conn: &mut SqliteConnection,
        methods: &[CachedPaymentMethod],
    ) -> DbResult<usize> {
        let now = Utc::now();

        for m in methods {
            sqlx::query(
                r#"
                INSERT INTO cached_payment_methods (id, name, kind, is_active, cached_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    kind = excluded.kind,
                    is_active = excluded.is_active,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&m.id)
            .bind(&m.name)
            .bind(&m.kind)
            .bind(m.is_active)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        debug!(count = methods.len(), "Cached payment methods upserted");
        Ok(methods.len())
    }

    pub async fn upsert_categories(
        conn: &mut SqliteConnection,
        categories: &[CachedCategory],
    ) -> DbResult<usize> {
        let now = Utc::now();

        for c in categories {
            sqlx::query(
                r#"
                INSERT INTO cached_categories (id, name, parent_id, is_active, cached_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    parent_id = excluded.parent_id,
                    is_active = excluded.is_active,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&c.id)
            .bind(&c.name)
            .bind(&c.parent_id)
            .bind(c.is_active)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        debug!(count = categories.len(), "Cached categories upserted");
        Ok(categories.len())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn get_product(&self, id: &str) -> DbResult<Option<CachedProduct>> {
        let product = sqlx::query_as::<_, CachedProduct>(
            r#"
            SELECT id, sku, barcode, name, price_cents, tax_rate_bps, category_id,
                   track_inventory, stock_quantity, is_active, cached_at
            FROM cached_products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    pub async fn get_customer(&self, id: &str) -> DbResult<Option<CachedCustomer>> {
        let customer = sqlx::query_as::<_, CachedCustomer>(
            r#"
            SELECT id, name, email, phone, loyalty_points, credit_balance_cents,
                   is_active, cached_at
            FROM cached_customers
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    pub async fn get_payment_method(&self, id: &str) -> DbResult<Option<CachedPaymentMethod>> {
        let method = sqlx::query_as::<_, CachedPaymentMethod>(
            "SELECT id, name, kind, is_active, cached_at FROM cached_payment_methods WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(method)
    }

    pub async fn get_category(&self, id: &str) -> DbResult<Option<CachedCategory>> {
        let category = sqlx::query_as::<_, CachedCategory>(
            "SELECT id, name, parent_id, is_active, cached_at FROM cached_categories WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(category)
    }

    pub async fn count_products(&self) -> DbResult<i64> {
        self.count("cached_products").await
    }

    pub async fn count_customers(&self) -> DbResult<i64> {
        self.count("cached_customers").await
    }

    pub async fn count_payment_methods(&self) -> DbResult<i64> {
        self.count("cached_payment_methods").await
    }

    pub async fn count_categories(&self) -> DbResult<i64> {
        self.count("cached_categories").await
    }

    // Table names are fixed literals from the methods above.
    async fn count(&self, table: &'static str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Stock Projection (Builder)
    // =========================================================================

    /// Cached stock of a product, `None` if it was never downloaded.
    pub async fn stock_quantity(
        conn: &mut SqliteConnection,
        product_id: &str,
    ) -> DbResult<Option<i64>> {
        let qty: Option<i64> =
            sqlx::query_scalar("SELECT stock_quantity FROM cached_products WHERE id = ?1")
                .bind(product_id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(qty)
    }

    /// Moves the cached stock by `delta`, flooring at zero, and returns
    /// `(before, after)`. `None` if the product was never downloaded.
    ///
    /// The update is relative, so it composes with other writers. Callers
    /// that need `before` to match must hold the write lock
    /// (`Database::begin_immediate`).
    pub async fn adjust_stock(
        conn: &mut SqliteConnection,
        product_id: &str,
        delta: i64,
    ) -> DbResult<Option<(i64, i64)>> {
        let Some(before) = Self::stock_quantity(conn, product_id).await? else {
            return Ok(None);
        };

        let after: i64 = sqlx::query_scalar(
            "UPDATE cached_products SET stock_quantity = MAX(stock_quantity + ?2, 0)
             WHERE id = ?1
             RETURNING stock_quantity",
        )
        .bind(product_id)
        .bind(delta)
        .fetch_one(&mut *conn)
        .await?;

        debug!(product_id = %product_id, before, after, "Cached stock adjusted");
        Ok(Some((before, after)))
    }

    /// Overwrites the cached stock level. Returns false if the product is unknown.
    pub async fn set_stock_quantity(
        conn: &mut SqliteConnection,
        product_id: &str,
        quantity: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query("UPDATE cached_products SET stock_quantity = ?2 WHERE id = ?1")
            .bind(product_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
