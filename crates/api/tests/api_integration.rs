//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use common::{ProductId, UserId};
use domain::{Money, Product};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::InMemoryPaymentGateway;
use saga::services::signature::SIGNATURE_HEADER;
use store::InMemoryCommerceStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    store: InMemoryCommerceStore,
    payment: InMemoryPaymentGateway,
}

impl TestApp {
    fn new() -> Self {
        let (state, store, payment) = api::create_default_state();
        let app = api::create_app(state, get_metrics_handle());
        Self {
            app,
            store,
            payment,
        }
    }

    async fn product(&self, cents: i64, stock: i64) -> ProductId {
        let id = ProductId::new();
        self.store
            .insert_product(Product::new(id, "Widget", Money::from_cents(cents), stock))
            .await;
        id
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn place(&self, user: UserId, product: ProductId, quantity: u32) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/orders")
                .header("content-type", "application/json")
                .header("x-user-id", user.to_string())
                .body(Body::from(
                    serde_json::json!({
                        "items": [{ "product_id": product.to_string(), "quantity": quantity }],
                        "shipping_address": "7 Canal Street"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
    }

    async fn as_user(&self, method: &str, uri: &str, user: UserId, role: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("x-user-id", user.to_string())
                .header("x-user-role", role)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn webhook(&self, payload: Vec<u8>, signature: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payment")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
    }
}

async fn json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new();

    let response = t
        .send(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_create_order() {
    let t = TestApp::new();
    let product = t.product(12500, 5).await;
    let user = UserId::new();

    let response = t.place(user, product, 2).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json(response).await;
    assert_eq!(json["order"]["status"], "PENDING");
    assert_eq!(json["order"]["total_cents"], 25000);
    assert_eq!(json["order"]["total"], "$250.00");
    assert_eq!(json["order"]["user_id"], user.to_string());
    assert_eq!(json["order"]["items"][0]["price_at_order_time_cents"], 12500);
    assert_eq!(json["payment"]["amount_cents"], 25000);
    assert_eq!(
        json["order"]["payment_intent_id"],
        json["payment"]["payment_intent_id"]
    );
    assert!(json["payment"]["client_secret"].as_str().is_some());
    assert_eq!(t.store.stock_of(product).await, Some(3));
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let t = TestApp::new();

    let response = t
        .send(
            Request::builder()
                .uri("/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = t
        .send(
            Request::builder()
                .uri("/orders")
                .header("x-user-id", "not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejected_orders_map_to_statuses() {
    let t = TestApp::new();
    let product = t.product(1000, 1).await;
    let user = UserId::new();

    let response = t.place(user, product, 2).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json(response).await["kind"], "insufficient_stock");

    let response = t.place(user, ProductId::new(), 1).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = t.place(user, product, 0).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(t.store.order_count().await, 0);
    assert_eq!(t.store.stock_of(product).await, Some(1));
}

#[tokio::test]
async fn test_invalid_product_id_is_bad_request() {
    let t = TestApp::new();

    let response = t
        .send(
            Request::builder()
                .method("POST")
                .uri("/orders")
                .header("content-type", "application/json")
                .header("x-user-id", UserId::new().to_string())
                .body(Body::from(
                    serde_json::json!({
                        "items": [{ "product_id": "SKU-001", "quantity": 1 }],
                        "shipping_address": "7 Canal Street"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_order_visible_to_owner_and_admin_only() {
    let t = TestApp::new();
    let product = t.product(500, 10).await;
    let owner = UserId::new();
    let created = json(t.place(owner, product, 1).await).await;
    let uri = format!("/orders/{}", created["order"]["id"].as_str().unwrap());

    let response = t.as_user("GET", &uri, owner, "USER").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "PENDING");

    let response = t.as_user("GET", &uri, UserId::new(), "USER").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t.as_user("GET", &uri, UserId::new(), "ADMIN").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let t = TestApp::new();
    let uri = format!("/orders/{}", uuid::Uuid::new_v4());

    let response = t.as_user("GET", &uri, UserId::new(), "ADMIN").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders_newest_first() {
    let t = TestApp::new();
    let product = t.product(500, 10).await;
    let user = UserId::new();
    let first = json(t.place(user, product, 1).await).await;
    let second = json(t.place(user, product, 2).await).await;
    t.place(UserId::new(), product, 1).await;

    let response = t.as_user("GET", "/orders", user, "USER").await;
    assert_eq!(response.status(), StatusCode::OK);
    let orders = json(response).await;
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["id"], second["order"]["id"]);
    assert_eq!(orders[1]["id"], first["order"]["id"]);

    let response = t.as_user("GET", "/admin/orders", user, "USER").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t.as_user("GET", "/admin/orders", UserId::new(), "ADMIN").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_webhook_marks_order_paid_once() {
    let t = TestApp::new();
    let product = t.product(12500, 5).await;
    let user = UserId::new();
    let created = json(t.place(user, product, 2).await).await;
    let order_id = created["order"]["id"].as_str().unwrap().parse().unwrap();

    let (payload, signature) = t
        .payment
        .signed_event("evt_100", "payment_intent.succeeded", Some(order_id))
        .unwrap();

    let response = t.webhook(payload.clone(), &signature).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "applied");

    let response = t.webhook(payload, &signature).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["outcome"], "duplicate");

    let uri = format!("/orders/{order_id}");
    let order = json(t.as_user("GET", &uri, user, "USER").await).await;
    assert_eq!(order["status"], "PAID");
    assert_eq!(t.store.processed_event_count().await, 1);
}

#[tokio::test]
async fn test_webhook_with_bad_signature_is_rejected() {
    let t = TestApp::new();
    let (payload, _) = t
        .payment
        .signed_event("evt_bad", "payment_intent.succeeded", None)
        .unwrap();

    let response = t.webhook(payload, "t=1,v1=deadbeef").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["kind"], "signature");
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_acknowledged() {
    let t = TestApp::new();
    let (payload, signature) = t
        .payment
        .signed_event(
            "evt_ghost",
            "payment_intent.succeeded",
            Some(common::OrderId::new()),
        )
        .unwrap();

    let response = t.webhook(payload, &signature).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["outcome"], "ignored_unknown_order");
    assert_eq!(t.store.processed_event_count().await, 0);
}

#[tokio::test]
async fn test_cancel_order_releases_stock() {
    let t = TestApp::new();
    let product = t.product(800, 3).await;
    let user = UserId::new();
    let created = json(t.place(user, product, 3).await).await;
    let uri = format!("/orders/{}/cancel", created["order"]["id"].as_str().unwrap());
    assert_eq!(t.store.stock_of(product).await, Some(0));

    let response = t.as_user("POST", &uri, UserId::new(), "USER").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t.as_user("POST", &uri, user, "USER").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "CANCELLED");
    assert_eq!(t.store.stock_of(product).await, Some(3));

    let response = t.as_user("POST", &uri, user, "USER").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_gateway_failure_then_payment_retry() {
    let t = TestApp::new();
    let product = t.product(4200, 2).await;
    let user = UserId::new();
    t.payment.set_fail_on_authorize(true);

    let response = t.place(user, product, 1).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json(response).await;
    let order_id = body["order_id"].as_str().unwrap().to_string();

    t.payment.set_fail_on_authorize(false);
    let response = t
        .as_user("POST", &format!("/orders/{order_id}/pay"), user, "USER")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["order"]["status"], "PENDING");
    assert_eq!(body["payment"]["amount_cents"], 4200);

    // The order was committed, so the outage is not a rejection.
    let response = t
        .send(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(!text.contains("reason=\"gateway\""));
    assert!(text.contains("outcome=\"unavailable\""));
}

#[tokio::test]
async fn test_payment_retry_is_owner_only() {
    let t = TestApp::new();
    let product = t.product(1500, 3).await;
    let owner = UserId::new();
    t.payment.set_fail_on_authorize(true);

    let response = t.place(owner, product, 1).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let order_id = json(response).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();
    t.payment.set_fail_on_authorize(false);

    let uri = format!("/orders/{order_id}/pay");
    let response = t.as_user("POST", &uri, UserId::new(), "ADMIN").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t.as_user("POST", &uri, UserId::new(), "USER").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // An admin can still read the order.
    let response = t
        .as_user("GET", &format!("/orders/{order_id}"), UserId::new(), "ADMIN")
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = t.as_user("POST", &uri, owner, "USER").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestApp::new();
    let product = t.product(100, 1).await;
    t.place(UserId::new(), product, 1).await;

    let response = t
        .send(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));
}
