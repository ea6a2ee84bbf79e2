//! Integration tests for the order fulfillment saga.

use std::sync::Arc;

use common::{OrderId, ProductId, UserId};
use domain::{Money, OrderStatus, Product};
use futures_util::future::join_all;
use saga::{
    IgnoreReason, InMemoryPaymentGateway, OrderLine, SagaCoordinator, SagaError, WebhookOutcome,
};
use store::{CommerceStore, InMemoryCommerceStore};

type TestCoordinator = SagaCoordinator<InMemoryCommerceStore, InMemoryPaymentGateway>;

struct TestHarness {
    coordinator: Arc<TestCoordinator>,
    store: InMemoryCommerceStore,
    payment: InMemoryPaymentGateway,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryCommerceStore::new();
        let payment = InMemoryPaymentGateway::new("whsec_integration");
        let coordinator = Arc::new(SagaCoordinator::new(store.clone(), payment.clone()));
        Self {
            coordinator,
            store,
            payment,
        }
    }

    async fn add_product(&self, name: &str, cents: i64, stock: i64) -> ProductId {
        let id = ProductId::new();
        self.store
            .insert_product(Product::new(id, name, Money::from_cents(cents), stock))
            .await;
        id
    }

    async fn place(&self, lines: Vec<OrderLine>) -> Result<saga::PlacedOrder, SagaError> {
        self.coordinator
            .create_order(UserId::new(), lines, "42 Harbour Road".to_string())
            .await
    }

    async fn deliver(
        &self,
        event_id: &str,
        event_type: &str,
        order_id: Option<OrderId>,
    ) -> Result<WebhookOutcome, SagaError> {
        let (payload, header) = self
            .payment
            .signed_event(event_id, event_type, order_id)
            .unwrap();
        self.coordinator.handle_webhook(&payload, &header).await
    }

    async fn status_of(&self, order_id: OrderId) -> OrderStatus {
        self.store
            .get_order(order_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

#[tokio::test]
async fn test_last_unit_goes_to_exactly_one_buyer() {
    let h = TestHarness::new();
    let product = h.add_product("Lamp", 4999, 1).await;

    let results = join_all((0..2).map(|_| h.place(vec![OrderLine::new(product, 1)]))).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(SagaError::InsufficientStock { available: 0, .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(short, 1);
    assert_eq!(h.store.stock_of(product).await, Some(0));
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_oversell() {
    let h = TestHarness::new();
    let product = h.add_product("Mug", 1200, 7).await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                coordinator
                    .create_order(
                        UserId::new(),
                        vec![OrderLine::new(product, 2)],
                        "1 Main St".to_string(),
                    )
                    .await
            })
        })
        .collect();

    let mut reserved = 0;
    for handle in handles {
        if let Ok(placed) = handle.await.unwrap() {
            reserved += placed.order.items[0].quantity;
        }
    }

    assert_eq!(reserved, 6);
    assert_eq!(h.store.stock_of(product).await, Some(1));
}

#[tokio::test]
async fn test_short_line_rolls_back_every_reservation() {
    let h = TestHarness::new();
    let plenty = h.add_product("Pen", 150, 10).await;
    let scarce = h.add_product("Ink", 800, 1).await;

    let result = h
        .place(vec![OrderLine::new(plenty, 4), OrderLine::new(scarce, 2)])
        .await;

    assert!(matches!(
        result,
        Err(SagaError::InsufficientStock {
            product_id,
            requested: 2,
            available: 1,
        }) if product_id == scarce
    ));
    assert_eq!(h.store.stock_of(plenty).await, Some(10));
    assert_eq!(h.store.stock_of(scarce).await, Some(1));
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.payment.authorize_calls(), 0);
}

#[tokio::test]
async fn test_duplicate_success_webhook_applies_once() {
    let h = TestHarness::new();
    let product = h.add_product("Chair", 12500, 5).await;
    let placed = h.place(vec![OrderLine::new(product, 2)]).await.unwrap();
    assert_eq!(placed.order.total_amount, Money::from_cents(25000));
    let order_id = placed.order.id;

    let first = h
        .deliver("evt_paid", "payment_intent.succeeded", Some(order_id))
        .await
        .unwrap();
    let second = h
        .deliver("evt_paid", "payment_intent.succeeded", Some(order_id))
        .await
        .unwrap();

    assert_eq!(
        first,
        WebhookOutcome::Applied {
            order_id,
            status: OrderStatus::Paid
        }
    );
    assert_eq!(
        second,
        WebhookOutcome::Duplicate {
            event_id: "evt_paid".to_string()
        }
    );
    assert_eq!(h.status_of(order_id).await, OrderStatus::Paid);
    assert_eq!(h.store.processed_event_count().await, 1);
    assert_eq!(h.store.stock_of(product).await, Some(3));
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_acknowledged() {
    let h = TestHarness::new();

    let outcome = h
        .deliver("evt_ghost", "payment_intent.succeeded", Some(OrderId::new()))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored(IgnoreReason::UnknownOrder));
    assert_eq!(h.store.processed_event_count().await, 0);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_total_matches_lines_across_repeated_products() {
    let h = TestHarness::new();
    let a = h.add_product("Bolt", 333, 100).await;
    let b = h.add_product("Nut", 129, 100).await;

    let placed = h
        .place(vec![
            OrderLine::new(a, 3),
            OrderLine::new(b, 7),
            OrderLine::new(a, 1),
        ])
        .await
        .unwrap();

    let order = h.store.get_order(placed.order.id).await.unwrap().unwrap();
    assert_eq!(order.items.len(), 3);
    assert_eq!(order.items_total(), order.total_amount);
    assert_eq!(order.total_amount, Money::from_cents(4 * 333 + 7 * 129));
    assert_eq!(h.store.stock_of(a).await, Some(96));
    assert_eq!(h.store.stock_of(b).await, Some(93));
}

#[tokio::test]
async fn test_settled_orders_never_transition_again() {
    let h = TestHarness::new();
    let product = h.add_product("Desk", 30000, 3).await;
    let paid = h.place(vec![OrderLine::new(product, 1)]).await.unwrap().order.id;
    let failed = h.place(vec![OrderLine::new(product, 1)]).await.unwrap().order.id;

    h.deliver("evt_1", "payment_intent.succeeded", Some(paid))
        .await
        .unwrap();
    h.deliver("evt_2", "payment_intent.payment_failed", Some(failed))
        .await
        .unwrap();
    assert_eq!(h.store.stock_of(product).await, Some(2));

    let late = h
        .deliver("evt_3", "payment_intent.payment_failed", Some(paid))
        .await
        .unwrap();
    assert_eq!(
        late,
        WebhookOutcome::AlreadySettled {
            order_id: paid,
            status: OrderStatus::Paid
        }
    );
    let late = h
        .deliver("evt_4", "payment_intent.succeeded", Some(failed))
        .await
        .unwrap();
    assert!(matches!(late, WebhookOutcome::AlreadySettled { .. }));

    assert!(matches!(
        h.coordinator.cancel_order(paid).await,
        Err(SagaError::InvalidState { .. })
    ));
    assert_eq!(h.status_of(paid).await, OrderStatus::Paid);
    assert_eq!(h.status_of(failed).await, OrderStatus::Failed);
    assert_eq!(h.store.stock_of(product).await, Some(2));
}

#[tokio::test]
async fn test_price_change_does_not_touch_existing_orders() {
    let h = TestHarness::new();
    let product = h.add_product("Kettle", 2500, 10).await;
    let placed = h.place(vec![OrderLine::new(product, 2)]).await.unwrap();

    assert!(h.store.set_price(product, Money::from_cents(9900)).await);

    let order = h.store.get_order(placed.order.id).await.unwrap().unwrap();
    assert_eq!(order.total_amount, Money::from_cents(5000));
    assert_eq!(order.items[0].price_at_order_time, Money::from_cents(2500));

    let next = h.place(vec![OrderLine::new(product, 1)]).await.unwrap();
    assert_eq!(next.order.total_amount, Money::from_cents(9900));
}

#[tokio::test]
async fn test_failed_payment_releases_stock() {
    let h = TestHarness::new();
    let product = h.add_product("Tent", 18000, 2).await;
    let order_id = h
        .place(vec![OrderLine::new(product, 2)])
        .await
        .unwrap()
        .order
        .id;
    assert_eq!(h.store.stock_of(product).await, Some(0));

    let outcome = h
        .deliver("evt_cancel", "payment_intent.canceled", Some(order_id))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            order_id,
            status: OrderStatus::Failed
        }
    );
    assert_eq!(h.store.stock_of(product).await, Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_webhooks_settle_order_once() {
    let h = TestHarness::new();
    let product = h.add_product("Kayak", 52000, 30).await;
    let mut kept = 0;

    for round in 0..10 {
        let order_id = h
            .place(vec![OrderLine::new(product, 3)])
            .await
            .unwrap()
            .order
            .id;

        let deliveries = [
            ("payment_intent.succeeded", format!("evt_ok_{round}")),
            ("payment_intent.payment_failed", format!("evt_fail_{round}")),
        ];
        let handles: Vec<_> = deliveries
            .iter()
            .map(|(event_type, event_id)| {
                let (payload, header) = h
                    .payment
                    .signed_event(event_id, event_type, Some(order_id))
                    .unwrap();
                let coordinator = Arc::clone(&h.coordinator);
                tokio::spawn(async move { coordinator.handle_webhook(&payload, &header).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let final_status = h.status_of(order_id).await;
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, WebhookOutcome::Applied { status, .. } if *status == final_status))
            .count();
        let settled = outcomes
            .iter()
            .filter(|o| matches!(o, WebhookOutcome::AlreadySettled { status, .. } if *status == final_status))
            .count();
        assert_eq!(applied, 1, "round {round}: {outcomes:?}");
        assert_eq!(settled, 1, "round {round}: {outcomes:?}");

        // Paid keeps the reservation; Failed returns it exactly once.
        match final_status {
            OrderStatus::Paid => kept += 3,
            OrderStatus::Failed => {}
            other => panic!("unexpected status {other}"),
        }
        assert_eq!(h.store.stock_of(product).await, Some(30 - kept));
    }
}

#[tokio::test]
async fn test_invalid_signature_mutates_nothing() {
    let h = TestHarness::new();
    let product = h.add_product("Rope", 900, 4).await;
    let order_id = h
        .place(vec![OrderLine::new(product, 1)])
        .await
        .unwrap()
        .order
        .id;

    let (payload, _) = h
        .payment
        .signed_event("evt_forged", "payment_intent.succeeded", Some(order_id))
        .unwrap();
    let forged = InMemoryPaymentGateway::new("not_the_secret")
        .signed_event("evt_forged", "payment_intent.succeeded", Some(order_id))
        .unwrap()
        .1;

    let result = h.coordinator.handle_webhook(&payload, &forged).await;
    assert!(matches!(result, Err(SagaError::Webhook(_))));
    assert_eq!(result.unwrap_err().kind(), "signature");
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);
    assert_eq!(h.store.processed_event_count().await, 0);
}

#[tokio::test]
async fn test_gateway_outage_then_retry() {
    let h = TestHarness::new();
    let product = h.add_product("Stool", 4500, 3).await;
    h.payment.set_fail_on_authorize(true);

    let order_id = match h.place(vec![OrderLine::new(product, 1)]).await {
        Err(SagaError::Gateway { order_id, .. }) => order_id,
        other => panic!("expected gateway error, got {other:?}"),
    };
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);
    assert_eq!(h.store.stock_of(product).await, Some(2));

    h.payment.set_fail_on_authorize(false);
    let first = h.coordinator.pay_order(order_id).await.unwrap();
    let second = h.coordinator.pay_order(order_id).await.unwrap();
    assert_eq!(first.payment, second.payment);
    assert_eq!(h.payment.intent_count(), 1);

    h.deliver("evt_ok", "payment_intent.succeeded", Some(order_id))
        .await
        .unwrap();
    assert_eq!(h.status_of(order_id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn test_orders_listed_newest_first_per_user() {
    let h = TestHarness::new();
    let product = h.add_product("Cup", 300, 10).await;
    let user = UserId::new();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let placed = h
            .coordinator
            .create_order(user, vec![OrderLine::new(product, 1)], "1 Main St".to_string())
            .await
            .unwrap();
        ids.push(placed.order.id);
    }
    h.place(vec![OrderLine::new(product, 1)]).await.unwrap();

    let mine: Vec<OrderId> = h
        .coordinator
        .list_orders_for_user(user)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    ids.reverse();
    assert_eq!(mine, ids);
    assert_eq!(h.coordinator.list_orders().await.unwrap().len(), 4);
}
