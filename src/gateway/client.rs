use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::ports::{CreateOrder, GatewayClient, GatewayError, GatewayRefund};

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct RefundBody {
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// HTTP client for the payment gateway's order and refund endpoints.
#[derive(Clone)]
pub struct HttpGatewayClient {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    circuit_breaker: Breaker,
}

impl HttpGatewayClient {
    /// Creates a client with the default breaker: open after 3 consecutive
    /// failures, retry after 60-120s.
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        Self::with_circuit_breaker(base_url, key_id, key_secret, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        key_id: String,
        key_secret: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            base_url,
            key_id,
            key_secret,
            circuit_breaker,
        }
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let invalid = || GatewayError::Rejected(format!("invalid gateway base url: {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Runs `call` through the breaker. Rejections are the gateway answering
    /// correctly, so only transport and server errors count as failures.
    async fn guarded<T, Fut>(&self, call: Fut) -> Result<T, GatewayError>
    where
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let result = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| !matches!(e, GatewayError::Rejected(_)),
                call,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Err(GatewayError::Rejected(format!("{}: {}", status, body)))
    } else {
        Err(GatewayError::Unavailable(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn create_order(&self, order: &CreateOrder) -> Result<String, GatewayError> {
        let request = self
            .client
            .post(self.url(&["orders"])?)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount: order.amount,
                currency: &order.currency,
                receipt: &order.receipt,
                notes: &order.metadata,
            });

        let created: OrderResponse = self
            .guarded(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
                read_json(response).await
            })
            .await?;

        tracing::debug!(gateway_order_id = %created.id, receipt = %order.receipt, "Gateway order created");
        Ok(created.id)
    }

    async fn issue_refund(
        &self,
        gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        let request = self
            .client
            .post(self.url(&["payments", gateway_payment_id, "refund"])?)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&RefundBody { amount });

        let refund: RefundResponse = self
            .guarded(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
                read_json(response).await
            })
            .await?;

        Ok(GatewayRefund {
            id: refund.id,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}
