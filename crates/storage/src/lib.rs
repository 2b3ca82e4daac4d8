use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{fs, path::Path, str::FromStr};

use shared::{
    domain::{CustomerId, CustomerStatus, OrderId, OrderPriority, OrderStatus, UserId},
    protocol::{OrderSortKey, SortOrder, StatusBreakdown},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub password_digest: String,
}

#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub title: String,
    pub status: OrderStatus,
    pub priority: OrderPriority,
    pub customer_id: Option<CustomerId>,
    pub manager_id: Option<UserId>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredCustomer {
    pub customer_id: CustomerId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub status: CustomerStatus,
    pub contact_person: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub title: String,
    pub priority: OrderPriority,
    pub customer_id: Option<CustomerId>,
    pub manager_id: Option<UserId>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub contact_person: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    pub limit: u32,
    pub sort_by: OrderSortKey,
    pub sort_order: SortOrder,
    pub search: Option<String>,
    pub status: Option<OrderStatus>,
    pub priority: Option<OrderPriority>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerListFilter {
    pub limit: u32,
    pub search: Option<String>,
    pub status: Option<CustomerStatus>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn upsert_user(
        &self,
        username: &str,
        display_name: &str,
        password_digest: &str,
    ) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username, display_name, password_digest, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET display_name=excluded.display_name
             RETURNING id",
        )
        .bind(username)
        .bind(display_name)
        .bind(password_digest)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, username, display_name, password_digest FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredUser {
            user_id: UserId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
            display_name: r.get::<String, _>(2),
            password_digest: r.get::<String, _>(3),
        }))
    }

    pub async fn user_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn insert_order(&self, order: NewOrder) -> Result<OrderId> {
        let rec = sqlx::query(
            "INSERT INTO orders (order_number, title, status, priority, customer_id, manager_id, due_at, created_at)
             VALUES (?, ?, 'new', ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&order.order_number)
        .bind(&order.title)
        .bind(order.priority.as_str())
        .bind(order.customer_id.map(|c| c.0))
        .bind(order.manager_id.map(|m| m.0))
        .bind(order.due_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(OrderId(rec.get::<i64, _>(0)))
    }

    pub async fn order_by_id(&self, order_id: OrderId) -> Result<Option<StoredOrder>> {
        let row = sqlx::query(
            "SELECT id, order_number, title, status, priority, customer_id, manager_id, due_at, completed_at, created_at
             FROM orders WHERE id = ?",
        )
        .bind(order_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_order_row))
    }

    pub async fn list_orders(&self, filter: &OrderListFilter) -> Result<Vec<StoredOrder>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, order_number, title, status, priority, customer_id, manager_id, due_at, completed_at, created_at
             FROM orders WHERE 1=1",
        );
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = format!("%{search}%");
                qb.push(" AND (order_number LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR title LIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
        }
        qb.push(" ORDER BY ");
        qb.push(match filter.sort_by {
            OrderSortKey::CreatedAt => "created_at",
            // NULL due dates sort last regardless of direction
            OrderSortKey::DueAt => "due_at IS NULL, due_at",
            OrderSortKey::Priority => {
                "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 ELSE 3 END"
            }
        });
        qb.push(match filter.sort_order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        });
        // secondary key keeps the listing stable across equal sort values
        qb.push(", id ASC");
        qb.push(" LIMIT ").push_bind(i64::from(filter.limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(map_order_row).collect())
    }

    /// Rewrites the order status; `completed_at` is stamped when the order
    /// enters COMPLETED and cleared when it leaves. Returns false when no
    /// such order exists.
    pub async fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<bool> {
        let completed_at = if status == OrderStatus::Completed {
            Some(Utc::now())
        } else {
            None
        };
        let result = sqlx::query("UPDATE orders SET status = ?, completed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(completed_at)
            .bind(order_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn order_statistics(&self, now: DateTime<Utc>) -> Result<(i64, StatusBreakdown, i64)> {
        let rows = sqlx::query("SELECT status, COUNT(*) FROM orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut total = 0i64;
        let mut by_status = StatusBreakdown::default();
        for row in rows {
            let count = row.get::<i64, _>(1);
            total += count;
            match OrderStatus::parse(&row.get::<String, _>(0)) {
                Some(OrderStatus::New) => by_status.new = count,
                Some(OrderStatus::InProgress) => by_status.in_progress = count,
                Some(OrderStatus::Paused) => by_status.paused = count,
                Some(OrderStatus::Completed) => by_status.completed = count,
                Some(OrderStatus::Cancelled) => by_status.cancelled = count,
                None => {}
            }
        }

        let overdue: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders
             WHERE due_at IS NOT NULL AND due_at < ?
               AND status NOT IN ('completed', 'cancelled')",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok((total, by_status, overdue))
    }

    pub async fn insert_customer(&self, customer: NewCustomer) -> Result<CustomerId> {
        let rec = sqlx::query(
            "INSERT INTO customers (name, email, phone, status, contact_person, created_at)
             VALUES (?, ?, ?, 'active', ?, ?)
             RETURNING id",
        )
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(customer.phone.as_deref())
        .bind(customer.contact_person.as_deref())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(CustomerId(rec.get::<i64, _>(0)))
    }

    pub async fn customer_by_id(&self, customer_id: CustomerId) -> Result<Option<StoredCustomer>> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, status, contact_person, created_at
             FROM customers WHERE id = ?",
        )
        .bind(customer_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(map_customer_row))
    }

    pub async fn list_customers(&self, filter: &CustomerListFilter) -> Result<Vec<StoredCustomer>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, email, phone, status, contact_person, created_at
             FROM customers WHERE 1=1",
        );
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = format!("%{search}%");
                qb.push(" AND (name LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR email LIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
        }
        qb.push(" ORDER BY lower(name) ASC, id ASC");
        qb.push(" LIMIT ").push_bind(i64::from(filter.limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(map_customer_row).collect())
    }
}

fn map_order_row(r: sqlx::sqlite::SqliteRow) -> StoredOrder {
    StoredOrder {
        order_id: OrderId(r.get::<i64, _>(0)),
        order_number: r.get::<String, _>(1),
        title: r.get::<String, _>(2),
        status: OrderStatus::parse(&r.get::<String, _>(3)).unwrap_or(OrderStatus::New),
        priority: OrderPriority::parse(&r.get::<String, _>(4)).unwrap_or(OrderPriority::Medium),
        customer_id: r.get::<Option<i64>, _>(5).map(CustomerId),
        manager_id: r.get::<Option<i64>, _>(6).map(UserId),
        due_at: r.get::<Option<DateTime<Utc>>, _>(7),
        completed_at: r.get::<Option<DateTime<Utc>>, _>(8),
        created_at: r.get::<DateTime<Utc>, _>(9),
    }
}

fn map_customer_row(r: sqlx::sqlite::SqliteRow) -> StoredCustomer {
    StoredCustomer {
        customer_id: CustomerId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        email: r.get::<String, _>(2),
        phone: r.get::<Option<String>, _>(3),
        status: CustomerStatus::parse(&r.get::<String, _>(4)).unwrap_or(CustomerStatus::Active),
        contact_person: r.get::<Option<String>, _>(5),
        created_at: r.get::<DateTime<Utc>, _>(6),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create parent directory '{}' for database url '{database_url}'",
                    parent.display()
                )
            })?;
        }
    }

    Ok(())
}
