use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{Money, NewOrder, Order, OrderItem, OrderStatus, Product};
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        CommerceStore, InventoryLedger, ProcessedEvent, ReserveOutcome, StoreTransaction,
        TransitionOutcome,
    },
};

const ORDER_COLUMNS: &str =
    "id, user_id, total_cents, status, shipping_address, payment_intent_id, created_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresCommerceStore {
    pool: PgPool,
}

impl PostgresCommerceStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Loads orders and attaches their items, preserving the row order.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows
            .into_iter()
            .map(row_to_order)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let item_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let item = row_to_item(row)?;
            items.entry(item.order_id).or_default().push(item);
        }
        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }
}

fn invalid(table: &'static str, reason: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidRow {
        table,
        reason: reason.to_string(),
    }
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        total_amount: Money::from_cents(row.try_get("total_cents")?),
        status: status.parse().map_err(|e| invalid("orders", e))?,
        shipping_address: row.try_get("shipping_address")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        created_at: row.try_get("created_at")?,
        items: Vec::new(),
    })
}

fn row_to_item(row: PgRow) -> Result<OrderItem> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(OrderItem {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: u32::try_from(quantity).map_err(|e| invalid("order_items", e))?,
        price_at_order_time: Money::from_cents(row.try_get("price_cents")?),
    })
}

/// An open PostgreSQL transaction.
///
/// Dropping it without calling `commit` rolls back, as `sqlx` does.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryLedger for PostgresTransaction {
    #[tracing::instrument(skip(self))]
    async fn try_reserve(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<ReserveOutcome> {
        let requested = i64::from(quantity);

        // Conditional decrement: the row lock taken by UPDATE serializes
        // concurrent reservations of the same product.
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2
            WHERE id = $1 AND stock_quantity >= $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(requested)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ReserveOutcome::Reserved);
        }

        // Nothing was written; only classify the miss.
        let available: Option<i64> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(match available {
            Some(available) => ReserveOutcome::InsufficientStock { available },
            None => ReserveOutcome::ProductNotFound,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET stock_quantity = stock_quantity + $2 WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(%product_id, "release for unknown product skipped");
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn create_order(&mut self, order: NewOrder) -> Result<Order> {
        let order = order.into_order(Utc::now().trunc_subsecs(6));

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, shipping_address, payment_intent_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NULL, $6, $6)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(&order.shipping_address)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;

        for (line_no, item) in order.items.iter().enumerate() {
            let line_no = i32::try_from(line_no).map_err(|e| invalid("order_items", e))?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, quantity, price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(line_no)
            .bind(item.product_id.as_uuid())
            .bind(i64::from(item.quantity))
            .bind(item.price_at_order_time.cents())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    async fn transition_status(
        &mut self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Updated);
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        match current {
            Some(status) => Ok(TransitionOutcome::Conflict {
                current: status.parse().map_err(|e| invalid("orders", e))?,
            }),
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id))]
    async fn record_processed_event(&mut self, event: &ProcessedEvent) -> Result<bool> {
        // INSERT first and inspect rows_affected: a concurrent duplicate
        // blocks on the primary key until this transaction finishes.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhook_events (event_id, event_type, order_id, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.order_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl CommerceStore for PostgresCommerceStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT id, name, price_cents, stock_quantity FROM products WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Product {
                id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
                name: row.try_get("name")?,
                price: Money::from_cents(row.try_get("price_cents")?),
                stock_quantity: row.try_get("stock_quantity")?,
            })),
            None => Ok(None),
        }
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        Ok(self.hydrate(rows).await?.into_iter().next())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn attach_payment_intent(
        &self,
        order_id: OrderId,
        payment_intent_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET payment_intent_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(order_id.as_uuid())
        .bind(payment_intent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_webhook_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
