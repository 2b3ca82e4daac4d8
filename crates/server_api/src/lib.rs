use chrono::Utc;
use shared::{
    domain::{OrderId, OrderStatus},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateCustomerRequest, CreateOrderRequest, CustomerListQuery, CustomerPayload, ListQuery,
        ListResponse, LoginResponse, OrderPayload, OrderStatistics, UserSummary,
    },
};
use storage::{
    CustomerListFilter, NewCustomer, NewOrder, OrderListFilter, Storage, StoredCustomer,
    StoredOrder,
};
use tracing::info;
use uuid::Uuid;

pub mod auth;

pub use auth::{AuthConfig, SessionClaims};

pub const MAX_LIST_LIMIT: u32 = 200;
pub const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub auth: AuthConfig,
}

pub fn authorize(ctx: &ApiContext, bearer_token: &str) -> Result<SessionClaims, ApiError> {
    auth::verify_session_token(&ctx.auth, bearer_token)
}

pub async fn login(
    ctx: &ApiContext,
    username: &str,
    password: &str,
) -> Result<LoginResponse, ApiError> {
    let user = ctx
        .storage
        .user_by_username(username)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "invalid credentials"))?;

    if user.password_digest != auth::password_digest(password) {
        return Err(ApiError::new(ErrorCode::Unauthorized, "invalid credentials"));
    }

    let (token, expires_at) = auth::mint_session_token(&ctx.auth, user.user_id, &user.username)?;
    info!(user_id = user.user_id.0, username = %user.username, "session started");
    Ok(LoginResponse {
        token,
        expires_at,
        user: UserSummary {
            user_id: user.user_id,
            username: user.username,
            display_name: user.display_name,
        },
    })
}

pub async fn list_orders(
    ctx: &ApiContext,
    query: &ListQuery,
) -> Result<ListResponse<OrderPayload>, ApiError> {
    let filter = OrderListFilter {
        limit: query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT),
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
        search: query.search.clone(),
        status: query.status,
        priority: query.priority,
    };
    let orders = ctx.storage.list_orders(&filter).await.map_err(internal)?;
    Ok(ListResponse {
        data: orders.into_iter().map(order_payload).collect(),
    })
}

pub async fn get_order(ctx: &ApiContext, order_id: OrderId) -> Result<OrderPayload, ApiError> {
    let order = ctx
        .storage
        .order_by_id(order_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "order not found"))?;
    Ok(order_payload(order))
}

pub async fn create_order(
    ctx: &ApiContext,
    request: CreateOrderRequest,
) -> Result<OrderPayload, ApiError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title must not be empty"));
    }

    if let Some(customer_id) = request.customer_id {
        ctx.storage
            .customer_by_id(customer_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::new(ErrorCode::Validation, "customer does not exist"))?;
    }

    let order_number = generate_order_number();
    let order_id = ctx
        .storage
        .insert_order(NewOrder {
            order_number: order_number.clone(),
            title: title.to_string(),
            priority: request.priority,
            customer_id: request.customer_id,
            manager_id: request.manager_id,
            due_at: request.due_at,
        })
        .await
        .map_err(internal)?;

    info!(order_id = order_id.0, %order_number, "order created");
    get_order(ctx, order_id).await
}

/// Moves an order along the status graph. Requesting the current status is a
/// no-op that returns the unchanged order, so retried requests stay safe.
pub async fn update_order_status(
    ctx: &ApiContext,
    order_id: OrderId,
    new_status: OrderStatus,
) -> Result<OrderPayload, ApiError> {
    let order = ctx
        .storage
        .order_by_id(order_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "order not found"))?;

    if order.status == new_status {
        return Ok(order_payload(order));
    }

    if !order.status.can_transition_to(new_status) {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!(
                "cannot move order from {} to {}",
                order.status.as_str(),
                new_status.as_str()
            ),
        ));
    }

    ctx.storage
        .set_order_status(order_id, new_status)
        .await
        .map_err(internal)?;
    info!(
        order_id = order_id.0,
        from = order.status.as_str(),
        to = new_status.as_str(),
        "order status updated"
    );
    get_order(ctx, order_id).await
}

pub async fn complete_order(ctx: &ApiContext, order_id: OrderId) -> Result<OrderPayload, ApiError> {
    let order = ctx
        .storage
        .order_by_id(order_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "order not found"))?;

    if order.status == OrderStatus::Completed {
        return Err(ApiError::new(ErrorCode::Validation, "order is already completed"));
    }
    if order.status.is_terminal() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "cancelled orders cannot be completed",
        ));
    }

    ctx.storage
        .set_order_status(order_id, OrderStatus::Completed)
        .await
        .map_err(internal)?;
    info!(order_id = order_id.0, from = order.status.as_str(), "order completed");
    get_order(ctx, order_id).await
}

pub async fn order_statistics(ctx: &ApiContext) -> Result<OrderStatistics, ApiError> {
    let (total, by_status, overdue_count) = ctx
        .storage
        .order_statistics(Utc::now())
        .await
        .map_err(internal)?;
    Ok(OrderStatistics {
        total,
        by_status,
        overdue_count,
    })
}

pub async fn list_customers(
    ctx: &ApiContext,
    query: &CustomerListQuery,
) -> Result<ListResponse<CustomerPayload>, ApiError> {
    let filter = CustomerListFilter {
        limit: query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT),
        search: query.search.clone(),
        status: query.status,
    };
    let customers = ctx.storage.list_customers(&filter).await.map_err(internal)?;
    Ok(ListResponse {
        data: customers.into_iter().map(customer_payload).collect(),
    })
}

pub async fn create_customer(
    ctx: &ApiContext,
    request: CreateCustomerRequest,
) -> Result<CustomerPayload, ApiError> {
    let name = request.name.trim();
    let email = request.email.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "name must not be empty"));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::new(ErrorCode::Validation, "a valid email is required"));
    }

    let customer_id = ctx
        .storage
        .insert_customer(NewCustomer {
            name: name.to_string(),
            email: email.to_string(),
            phone: request.phone,
            contact_person: request.contact_person,
        })
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                ApiError::new(ErrorCode::Validation, "a customer with this email already exists")
            } else {
                internal(e)
            }
        })?;

    let customer = ctx
        .storage
        .customer_by_id(customer_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "customer vanished after insert"))?;
    Ok(customer_payload(customer))
}

fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("MO-{}", suffix[..8].to_uppercase())
}

fn order_payload(order: StoredOrder) -> OrderPayload {
    OrderPayload {
        order_id: order.order_id,
        order_number: order.order_number,
        title: order.title,
        status: order.status,
        priority: order.priority,
        customer_id: order.customer_id,
        manager_id: order.manager_id,
        due_at: order.due_at,
        created_at: order.created_at,
    }
}

fn customer_payload(customer: StoredCustomer) -> CustomerPayload {
    CustomerPayload {
        customer_id: customer.customer_id,
        name: customer.name,
        email: customer.email,
        phone: customer.phone,
        status: customer.status,
        contact_person: customer.contact_person,
        created_at: customer.created_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::OrderPriority;

    async fn setup() -> ApiContext {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        storage
            .upsert_user("planner", "Shop Planner", &auth::password_digest("workbench"))
            .await
            .expect("user");
        ApiContext {
            storage,
            auth: AuthConfig {
                secret: "test-secret".to_string(),
                token_ttl_seconds: 3600,
            },
        }
    }

    async fn seed_order(ctx: &ApiContext, title: &str) -> OrderPayload {
        create_order(
            ctx,
            CreateOrderRequest {
                title: title.to_string(),
                priority: OrderPriority::Medium,
                customer_id: None,
                manager_id: None,
                due_at: None,
            },
        )
        .await
        .expect("order")
    }

    #[tokio::test]
    async fn login_issues_a_verifiable_token() {
        let ctx = setup().await;
        let response = login(&ctx, "planner", "workbench").await.expect("login");
        let claims = authorize(&ctx, &response.token).expect("authorize");
        assert_eq!(claims.username, "planner");
        assert_eq!(response.user.display_name, "Shop Planner");
    }

    #[tokio::test]
    async fn login_rejects_bad_password_and_unknown_user() {
        let ctx = setup().await;
        let err = login(&ctx, "planner", "wrong").await.expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
        let err = login(&ctx, "ghost", "workbench").await.expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn created_orders_get_a_number_and_start_new() {
        let ctx = setup().await;
        let order = seed_order(&ctx, "oak entry door").await;
        assert!(order.order_number.starts_with("MO-"));
        assert_eq!(order.order_number.len(), 11);
        assert_eq!(order.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn create_order_rejects_missing_customer() {
        let ctx = setup().await;
        let err = create_order(
            &ctx,
            CreateOrderRequest {
                title: "door".to_string(),
                priority: OrderPriority::Low,
                customer_id: Some(shared::domain::CustomerId(99)),
                manager_id: None,
                due_at: None,
            },
        )
        .await
        .expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn status_updates_follow_the_transition_graph() {
        let ctx = setup().await;
        let order = seed_order(&ctx, "balcony door").await;

        let updated = update_order_status(&ctx, order.order_id, OrderStatus::InProgress)
            .await
            .expect("to in_progress");
        assert_eq!(updated.status, OrderStatus::InProgress);

        let completed = complete_order(&ctx, order.order_id).await.expect("complete");
        assert_eq!(completed.status, OrderStatus::Completed);

        // completed orders reopen through NEW, never straight to IN_PROGRESS
        let err = update_order_status(&ctx, order.order_id, OrderStatus::InProgress)
            .await
            .expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Validation));

        let reopened = update_order_status(&ctx, order.order_id, OrderStatus::New)
            .await
            .expect("reopen");
        assert_eq!(reopened.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn same_status_update_is_a_no_op() {
        let ctx = setup().await;
        let order = seed_order(&ctx, "door").await;
        let unchanged = update_order_status(&ctx, order.order_id, OrderStatus::New)
            .await
            .expect("no-op");
        assert_eq!(unchanged.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn completing_twice_is_rejected() {
        let ctx = setup().await;
        let order = seed_order(&ctx, "door").await;
        update_order_status(&ctx, order.order_id, OrderStatus::InProgress)
            .await
            .expect("start");
        complete_order(&ctx, order.order_id).await.expect("complete");
        let err = complete_order(&ctx, order.order_id)
            .await
            .expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn statistics_reflect_the_order_set() {
        let ctx = setup().await;
        let first = seed_order(&ctx, "first").await;
        seed_order(&ctx, "second").await;
        update_order_status(&ctx, first.order_id, OrderStatus::InProgress)
            .await
            .expect("start");

        let stats = order_statistics(&ctx).await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.new, 1);
        assert_eq!(stats.by_status.in_progress, 1);
        assert_eq!(stats.overdue_count, 0);
    }

    #[tokio::test]
    async fn duplicate_customer_email_is_a_validation_error() {
        let ctx = setup().await;
        let request = CreateCustomerRequest {
            name: "Acme Interiors".to_string(),
            email: "orders@acme.example".to_string(),
            phone: None,
            contact_person: None,
        };
        create_customer(&ctx, request.clone()).await.expect("first");
        let err = create_customer(&ctx, request).await.expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }
}
