use mockito::Matcher;
use serde_json::json;
use std::collections::BTreeMap;

use payflow_core::gateway::HttpGatewayClient;
use payflow_core::ports::{CreateOrder, GatewayClient, GatewayError};

fn client(base_url: String, failures: u32) -> HttpGatewayClient {
    HttpGatewayClient::with_circuit_breaker(
        base_url,
        "key_id".to_string(),
        "key_secret".to_string(),
        failures,
        60,
    )
}

fn order() -> CreateOrder {
    CreateOrder {
        amount: 150_000,
        currency: "INR".to_string(),
        receipt: "ord_1".to_string(),
        metadata: BTreeMap::from([("booking_id".to_string(), "bk_1".to_string())]),
    }
}

#[tokio::test]
async fn test_create_order_returns_gateway_id() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/orders")
        .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
        .match_body(Matcher::PartialJson(json!({
            "amount": 150000,
            "currency": "INR",
            "receipt": "ord_1",
            "notes": { "booking_id": "bk_1" },
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"order_gw_42","status":"created"}"#)
        .create_async()
        .await;

    let id = client(server.url(), 3).create_order(&order()).await.unwrap();

    assert_eq!(id, "order_gw_42");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_issue_refund_defaults_status() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/payments/p1/refund")
        .match_body(Matcher::Json(json!({ "amount": 5000 })))
        .with_status(200)
        .with_body(r#"{"id":"r1"}"#)
        .create_async()
        .await;

    let refund = client(server.url(), 3).issue_refund("p1", 5_000).await.unwrap();

    assert_eq!(refund.id, "r1");
    assert_eq!(refund.status, "pending");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_error_is_rejection_and_keeps_circuit_closed() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/payments/p1/refund")
        .with_status(400)
        .with_body(r#"{"error":"refund amount exceeds captured amount"}"#)
        .expect(2)
        .create_async()
        .await;

    let client = client(server.url(), 1);
    for _ in 0..2 {
        let err = client.issue_refund("p1", 999_999).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(ref msg) if msg.contains("exceeds")));
    }
    assert_eq!(client.circuit_state(), "closed");
}

#[tokio::test]
async fn test_rate_limit_is_unavailable() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/orders")
        .with_status(429)
        .create_async()
        .await;

    let err = client(server.url(), 3).create_order(&order()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn test_undecodable_response_is_invalid() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/orders")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let err = client(server.url(), 3).create_order(&order()).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_server_errors_open_circuit() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/payments/p1/refund")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let client = client(server.url(), 2);
    for _ in 0..2 {
        let err = client.issue_refund("p1", 100).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    assert_eq!(client.circuit_state(), "open");
    let err = client.issue_refund("p1", 100).await.unwrap_err();
    assert_eq!(err, GatewayError::CircuitOpen);
    mock.assert_async().await;
}
