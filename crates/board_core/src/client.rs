use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use shared::{
    domain::{OrderId, OrderStatus},
    error::{ApiError, ApiException},
    protocol::{
        CustomerListQuery, CustomerPayload, ListQuery, ListResponse, LoginRequest, LoginResponse,
        OrderPayload, OrderStatistics, UpdateOrderStatusRequest,
    },
};

use crate::auth::{AuthContext, AuthSession};

/// Remote order collection, as the board sees it.
#[async_trait]
pub trait OrderDataClient: Send + Sync {
    async fn list(&self, query: &ListQuery) -> Result<ListResponse<OrderPayload>>;
    async fn update_status(&self, order_id: OrderId, status: OrderStatus) -> Result<OrderPayload>;
    async fn complete(&self, order_id: OrderId) -> Result<OrderPayload>;
    async fn statistics(&self) -> Result<OrderStatistics>;
}

#[async_trait]
pub trait CustomerDataClient: Send + Sync {
    async fn list(&self, query: &CustomerListQuery) -> Result<ListResponse<CustomerPayload>>;
}

pub struct MissingOrderClient;

#[async_trait]
impl OrderDataClient for MissingOrderClient {
    async fn list(&self, _query: &ListQuery) -> Result<ListResponse<OrderPayload>> {
        Err(anyhow!("order api is unavailable"))
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        _status: OrderStatus,
    ) -> Result<OrderPayload> {
        Err(anyhow!("order api is unavailable for order {}", order_id.0))
    }

    async fn complete(&self, order_id: OrderId) -> Result<OrderPayload> {
        Err(anyhow!("order api is unavailable for order {}", order_id.0))
    }

    async fn statistics(&self) -> Result<OrderStatistics> {
        Err(anyhow!("order api is unavailable"))
    }
}

pub struct MissingCustomerClient;

#[async_trait]
impl CustomerDataClient for MissingCustomerClient {
    async fn list(&self, _query: &CustomerListQuery) -> Result<ListResponse<CustomerPayload>> {
        Err(anyhow!("customer api is unavailable"))
    }
}

/// Exchanges credentials for a session. The caller hands the result to an
/// `AuthContext`, which every HTTP client reads its bearer token from.
pub async fn login(
    http: &Client,
    server_url: &str,
    username: &str,
    password: &str,
) -> Result<AuthSession> {
    let response = http
        .post(format!("{server_url}/api/auth/login"))
        .json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
        .send()
        .await?;
    let body: LoginResponse = read_json(response).await?;
    Ok(AuthSession {
        user: body.user,
        token: body.token,
        expires_at: body.expires_at,
        started_at: Utc::now(),
    })
}

pub struct HttpOrderClient {
    http: Client,
    server_url: String,
    auth: Arc<AuthContext>,
}

impl HttpOrderClient {
    pub fn new(server_url: impl Into<String>, auth: Arc<AuthContext>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            auth,
        }
    }

    async fn with_bearer(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl OrderDataClient for HttpOrderClient {
    async fn list(&self, query: &ListQuery) -> Result<ListResponse<OrderPayload>> {
        let request = self
            .http
            .get(format!("{}/api/orders", self.server_url))
            .query(query);
        let response = self.with_bearer(request).await.send().await?;
        read_json(response).await
    }

    async fn update_status(&self, order_id: OrderId, status: OrderStatus) -> Result<OrderPayload> {
        let request = self
            .http
            .patch(format!("{}/api/orders/{}/status", self.server_url, order_id.0))
            .json(&UpdateOrderStatusRequest { status });
        let response = self.with_bearer(request).await.send().await?;
        read_json(response).await
    }

    async fn complete(&self, order_id: OrderId) -> Result<OrderPayload> {
        let request = self
            .http
            .post(format!("{}/api/orders/{}/complete", self.server_url, order_id.0));
        let response = self.with_bearer(request).await.send().await?;
        read_json(response).await
    }

    async fn statistics(&self) -> Result<OrderStatistics> {
        let request = self
            .http
            .get(format!("{}/api/orders/statistics", self.server_url));
        let response = self.with_bearer(request).await.send().await?;
        read_json(response).await
    }
}

pub struct HttpCustomerClient {
    http: Client,
    server_url: String,
    auth: Arc<AuthContext>,
}

impl HttpCustomerClient {
    pub fn new(server_url: impl Into<String>, auth: Arc<AuthContext>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            auth,
        }
    }
}

#[async_trait]
impl CustomerDataClient for HttpCustomerClient {
    async fn list(&self, query: &CustomerListQuery) -> Result<ListResponse<CustomerPayload>> {
        let mut request = self
            .http
            .get(format!("{}/api/customers", self.server_url))
            .query(query);
        if let Some(token) = self.auth.bearer_token().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        read_json(response).await
    }
}

/// Decodes a success body, or surfaces the server's `ApiError` as a typed
/// exception so rejections read as more than a bare status code.
async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    match response.json::<ApiError>().await {
        Ok(err) => Err(ApiException::new(err.code, err.message).into()),
        Err(_) => Err(anyhow!("request failed with status {status}")),
    }
}
