//! `PostgreSQL` implementation of the storage traits.
//!
//! Queries are checked at runtime (`sqlx::query_as`) so the crate builds
//! without a live database. Uniqueness invariants are enforced by the schema;
//! unique violations surface as [`RepositoryError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};

use iap_checkout_core::{
    BasketId, BasketStatus, CurrencyCode, Email, OrderId, OrderStatus, PaymentId,
    PaymentProcessor, Price, ProductId, SiteId, UserId,
};

use super::{
    BasketStore, OrderStore, PaymentStore, ProductCatalog, RepositoryError, UserDirectory,
};
use crate::models::{
    Basket, BasketAttribute, BasketLine, CurrentUser, NewOrder, NewPayment, Order, OrderLine,
    PaymentRecord, Product,
};

/// Store backed by the `iap` schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BasketRow {
    id: i64,
    owner_id: i64,
    site_id: i64,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LineRow {
    product_id: i64,
    sku: String,
    title: String,
    quantity: i32,
    unit_price: Decimal,
    currency: String,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    number: String,
    basket_id: i64,
    owner_id: i64,
    site_id: i64,
    status: String,
    total: Decimal,
    currency: String,
    payment_processor: String,
    date_placed: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    basket_id: i64,
    processor: String,
    transaction_id: String,
    amount: Decimal,
    currency: String,
    raw_response: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    sku: String,
    title: String,
    price: Decimal,
    currency: String,
    is_active: bool,
    expires: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    username: String,
}

// =============================================================================
// Conversions
// =============================================================================

fn currency(raw: &str) -> Result<CurrencyCode, RepositoryError> {
    raw.parse().map_err(RepositoryError::DataCorruption)
}

fn quantity(raw: i32) -> Result<u32, RepositoryError> {
    u32::try_from(raw)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative quantity {raw}")))
}

fn stored_quantity(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption(format!("quantity {quantity} out of range")))
}

fn processor(raw: &str) -> Result<PaymentProcessor, RepositoryError> {
    raw.parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("{e}")))
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

impl TryFrom<LineRow> for BasketLine {
    type Error = RepositoryError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: ProductId::new(row.product_id),
            sku: row.sku,
            title: row.title,
            quantity: quantity(row.quantity)?,
            unit_price: Price::new(row.unit_price, currency(&row.currency)?),
        })
    }
}

impl TryFrom<LineRow> for OrderLine {
    type Error = RepositoryError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: ProductId::new(row.product_id),
            sku: row.sku,
            title: row.title,
            quantity: quantity(row.quantity)?,
            unit_price: Price::new(row.unit_price, currency(&row.currency)?),
        })
    }
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = RepositoryError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PaymentId::new(row.id),
            basket_id: BasketId::new(row.basket_id),
            processor: processor(&row.processor)?,
            transaction_id: row.transaction_id,
            amount: Price::new(row.amount, currency(&row.currency)?),
            raw_response: row.raw_response,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ProductId::new(row.id),
            sku: row.sku,
            title: row.title,
            price: Price::new(row.price, currency(&row.currency)?),
            is_active: row.is_active,
            expires: row.expires,
        })
    }
}

// =============================================================================
// Shared loaders
// =============================================================================

async fn load_basket(
    conn: &mut PgConnection,
    row: BasketRow,
) -> Result<Basket, RepositoryError> {
    let lines: Vec<LineRow> = sqlx::query_as(
        r"
        SELECT l.product_id, p.sku, p.title, l.quantity, l.unit_price, l.currency
        FROM iap.basket_line l
        JOIN iap.product p ON p.id = l.product_id
        WHERE l.basket_id = $1
        ORDER BY l.id
        ",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Basket {
        id: BasketId::new(row.id),
        owner: UserId::new(row.owner_id),
        site: SiteId::new(row.site_id),
        status: row
            .status
            .parse::<BasketStatus>()
            .map_err(RepositoryError::DataCorruption)?,
        lines: lines
            .into_iter()
            .map(BasketLine::try_from)
            .collect::<Result<_, _>>()?,
        created_at: row.created_at,
    })
}

async fn basket_by_id(
    conn: &mut PgConnection,
    id: BasketId,
) -> Result<Option<Basket>, RepositoryError> {
    let row: Option<BasketRow> = sqlx::query_as(
        r"
        SELECT id, owner_id, site_id, status, created_at
        FROM iap.basket
        WHERE id = $1
        ",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(load_basket(conn, row).await?)),
        None => Ok(None),
    }
}

async fn load_order(conn: &mut PgConnection, row: OrderRow) -> Result<Order, RepositoryError> {
    let lines: Vec<LineRow> = sqlx::query_as(
        r"
        SELECT product_id, sku, title, quantity, unit_price, currency
        FROM iap.order_line
        WHERE order_id = $1
        ORDER BY id
        ",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Order {
        id: OrderId::new(row.id),
        number: row.number,
        basket_id: BasketId::new(row.basket_id),
        owner: UserId::new(row.owner_id),
        site: SiteId::new(row.site_id),
        status: row
            .status
            .parse::<OrderStatus>()
            .map_err(RepositoryError::DataCorruption)?,
        total: Price::new(row.total, currency(&row.currency)?),
        payment_processor: processor(&row.payment_processor)?,
        lines: lines
            .into_iter()
            .map(OrderLine::try_from)
            .collect::<Result<_, _>>()?,
        date_placed: row.date_placed,
    })
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl BasketStore for PgStore {
    #[instrument(skip(self))]
    async fn find_for_owner(
        &self,
        id: BasketId,
        owner: UserId,
    ) -> Result<Option<Basket>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let basket = basket_by_id(&mut conn, id).await?;
        Ok(basket.filter(|basket| basket.owner == owner))
    }

    #[instrument(skip(self))]
    async fn open_basket(&self, owner: UserId, site: SiteId) -> Result<Basket, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        // A concurrent request may win the insert; the partial unique index
        // turns that into a no-op and the follow-up select finds its basket.
        sqlx::query::<sqlx::Postgres>(
            r"
            INSERT INTO iap.basket (owner_id, site_id, status)
            VALUES ($1, $2, 'Open')
            ON CONFLICT (owner_id, site_id) WHERE status = 'Open' DO NOTHING
            ",
        )
        .bind(owner)
        .bind(site)
        .execute(&mut *conn)
        .await?;

        let row: BasketRow = sqlx::query_as(
            r"
            SELECT id, owner_id, site_id, status, created_at
            FROM iap.basket
            WHERE owner_id = $1 AND site_id = $2 AND status = 'Open'
            ",
        )
        .bind(owner)
        .bind(site)
        .fetch_one(&mut *conn)
        .await?;

        load_basket(&mut conn, row).await
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    async fn replace_lines(
        &self,
        id: BasketId,
        lines: Vec<BasketLine>,
    ) -> Result<Basket, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM iap.basket WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        match status {
            None => return Err(RepositoryError::NotFound),
            Some((status,)) if status != BasketStatus::Open.as_str() => {
                return Err(RepositoryError::Conflict(format!(
                    "basket {id} is {status} and cannot change lines"
                )));
            }
            Some(_) => {}
        }

        sqlx::query::<sqlx::Postgres>("DELETE FROM iap.basket_line WHERE basket_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for line in &lines {
            sqlx::query::<sqlx::Postgres>(
                r"
                INSERT INTO iap.basket_line (basket_id, product_id, quantity, unit_price, currency)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(id)
            .bind(line.product_id)
            .bind(stored_quantity(line.quantity)?)
            .bind(line.unit_price.amount)
            .bind(line.unit_price.currency.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let basket = basket_by_id(&mut tx, id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        tx.commit().await?;

        debug!(basket_id = %id, "Replaced basket lines");
        Ok(basket)
    }

    async fn set_attribute(
        &self,
        id: BasketId,
        key: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query::<sqlx::Postgres>(
            r"
            INSERT INTO iap.basket_attribute (basket_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (basket_id, key) DO UPDATE SET value = EXCLUDED.value
            ",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attributes(&self, id: BasketId) -> Result<Vec<BasketAttribute>, RepositoryError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r"
            SELECT key, value FROM iap.basket_attribute
            WHERE basket_id = $1
            ORDER BY key
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| BasketAttribute { key, value })
            .collect())
    }

    #[instrument(skip(self))]
    async fn freeze(&self, id: BasketId) -> Result<Basket, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        let updated = sqlx::query::<sqlx::Postgres>(
            r"
            UPDATE iap.basket SET status = 'Frozen'
            WHERE id = $1 AND status IN ('Open', 'Frozen')
            ",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        let basket = basket_by_id(&mut conn, id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "basket {id} is {}",
                basket.status
            )));
        }
        Ok(basket)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    #[instrument(skip(self, order), fields(basket_id = %order.basket_id, number = %order.number))]
    async fn create_for_basket(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let submitted = sqlx::query::<sqlx::Postgres>(
            r"
            UPDATE iap.basket SET status = 'Submitted'
            WHERE id = $1 AND status <> 'Submitted'
            ",
        )
        .bind(order.basket_id)
        .execute(&mut *tx)
        .await?;
        if submitted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "basket {} is missing or already submitted",
                order.basket_id
            )));
        }

        let row: OrderRow = sqlx::query_as(
            r"
            INSERT INTO iap.purchase_order
                (number, basket_id, owner_id, site_id, status, total, currency, payment_processor)
            VALUES ($1, $2, $3, $4, 'Complete', $5, $6, $7)
            RETURNING id, number, basket_id, owner_id, site_id, status, total, currency,
                      payment_processor, date_placed
            ",
        )
        .bind(&order.number)
        .bind(order.basket_id)
        .bind(order.owner)
        .bind(order.site)
        .bind(order.total.amount)
        .bind(order.total.currency.as_str())
        .bind(order.payment_processor.name())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "order for basket"))?;

        for line in &order.lines {
            sqlx::query::<sqlx::Postgres>(
                r"
                INSERT INTO iap.order_line
                    (order_id, product_id, sku, title, quantity, unit_price, currency)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(row.id)
            .bind(line.product_id)
            .bind(&line.sku)
            .bind(&line.title)
            .bind(stored_quantity(line.quantity)?)
            .bind(line.unit_price.amount)
            .bind(line.unit_price.currency.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let placed = load_order(&mut tx, row).await?;
        tx.commit().await?;

        debug!(order_id = %placed.id, "Order created");
        Ok(placed)
    }

    async fn find_for_basket(&self, basket: BasketId) -> Result<Option<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        let row: Option<OrderRow> = sqlx::query_as(
            r"
            SELECT id, number, basket_id, owner_id, site_id, status, total, currency,
                   payment_processor, date_placed
            FROM iap.purchase_order
            WHERE basket_id = $1 AND status <> 'Cancelled'
            ",
        )
        .bind(basket)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Some(load_order(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn user_has_purchased(
        &self,
        user: UserId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        let row: (bool,) = sqlx::query_as(
            r"
            SELECT EXISTS(
                SELECT 1
                FROM iap.purchase_order o
                JOIN iap.order_line l ON l.order_id = o.id
                WHERE o.owner_id = $1 AND l.product_id = $2 AND o.status <> 'Cancelled'
            )
            ",
        )
        .bind(user)
        .bind(product)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    #[instrument(skip(self, payment), fields(processor = %payment.processor, transaction_id = %payment.transaction_id))]
    async fn record(&self, payment: NewPayment) -> Result<PaymentRecord, RepositoryError> {
        let row: PaymentRow = sqlx::query_as(
            r"
            INSERT INTO iap.payment
                (basket_id, processor, transaction_id, amount, currency, raw_response)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, basket_id, processor, transaction_id, amount, currency,
                      raw_response, created_at
            ",
        )
        .bind(payment.basket_id)
        .bind(payment.processor.name())
        .bind(&payment.transaction_id)
        .bind(payment.amount.amount)
        .bind(payment.amount.currency.as_str())
        .bind(&payment.raw_response)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "payment for transaction"))?;

        PaymentRecord::try_from(row)
    }

    async fn find_by_transaction(
        &self,
        processor: PaymentProcessor,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r"
            SELECT id, basket_id, processor, transaction_id, amount, currency,
                   raw_response, created_at
            FROM iap.payment
            WHERE processor = $1 AND transaction_id = $2
            ",
        )
        .bind(processor.name())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn find_by_skus(&self, skus: &[String]) -> Result<Vec<Product>, RepositoryError> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            r"
            SELECT id, sku, title, price, currency, is_active, expires
            FROM iap.product
            WHERE sku = ANY($1)
            ORDER BY id
            ",
        )
        .bind(skus)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_by_token_digest(
        &self,
        digest: &str,
    ) -> Result<Option<CurrentUser>, RepositoryError> {
        let row: Option<UserRow> = sqlx::query_as(
            r"
            SELECT u.id, u.email, u.username
            FROM iap.access_token t
            JOIN iap.app_user u ON u.id = t.user_id
            WHERE t.token_digest = $1
            ",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let email = Email::parse(&row.email).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?;
            Ok(CurrentUser {
                id: UserId::new(row.id),
                email,
                username: row.username,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_conversions_reject_out_of_range() {
        assert_eq!(quantity(3).unwrap(), 3);
        assert!(matches!(quantity(-1), Err(RepositoryError::DataCorruption(_))));

        assert_eq!(stored_quantity(3).unwrap(), 3);
        assert!(matches!(
            stored_quantity(u32::MAX),
            Err(RepositoryError::DataCorruption(_))
        ));
    }
}
