//! Integration tests for order pricing and the status state machine.

use chrono::Utc;
use common::{ProductId, UserId};
use domain::{Money, NewOrder, OrderError, OrderStatus, PricedLine, Product};

fn line(cents: i64, quantity: u32) -> PricedLine {
    PricedLine::new(
        Product::new(ProductId::new(), "Widget", Money::from_cents(cents), 100),
        quantity,
    )
}

mod order_lifecycle {
    use super::*;

    #[test]
    fn priced_order_becomes_pending_with_frozen_total() {
        let user_id = UserId::new();
        let new_order = NewOrder::price(
            user_id,
            "12 Quay Lane",
            &[line(12500, 1), line(12500, 1)],
        )
        .unwrap();
        let order_id = new_order.id;

        let order = new_order.into_order(Utc::now());

        assert_eq!(order.id, order_id);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, Money::from_cents(25000));
        assert_eq!(order.total_amount.to_string(), "$250.00");
        assert_eq!(order.items_total(), order.total_amount);
        assert!(order.items.iter().all(|item| item.order_id == order_id));
        assert!(order.is_owned_by(user_id));
        assert!(order.payment_intent_id.is_none());
    }

    #[test]
    fn pending_settles_exactly_once() {
        for settled in [
            OrderStatus::Paid,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert!(OrderStatus::Pending.can_transition_to(settled));
            assert!(settled.is_terminal());
            for next in [
                OrderStatus::Pending,
                OrderStatus::Paid,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
            ] {
                assert!(
                    !settled.can_transition_to(next),
                    "{settled} must not move to {next}"
                );
            }
        }
    }

    #[test]
    fn only_unpaid_outcomes_release_stock() {
        assert!(!OrderStatus::Paid.releases_stock());
        assert!(OrderStatus::Failed.releases_stock());
        assert!(OrderStatus::Cancelled.releases_stock());
        assert!(!OrderStatus::Pending.releases_stock());
    }
}

mod validation {
    use super::*;

    #[test]
    fn invalid_requests_are_rejected_before_pricing() {
        let product_id = ProductId::new();
        assert_eq!(
            NewOrder::validate_request(&[], "addr"),
            Err(OrderError::NoItems)
        );
        assert_eq!(
            NewOrder::validate_request(&[(product_id, 1)], "   "),
            Err(OrderError::ShippingAddressRequired)
        );
        assert_eq!(
            NewOrder::validate_request(&[(product_id, 0)], "addr"),
            Err(OrderError::InvalidQuantity {
                product_id,
                quantity: 0
            })
        );
        assert!(NewOrder::validate_request(&[(product_id, 3)], "addr").is_ok());
    }
}

mod serialization {
    use super::*;

    #[test]
    fn order_serializes_status_and_cents() {
        let order = NewOrder::price(UserId::new(), "addr", &[line(999, 3)])
            .unwrap()
            .into_order(Utc::now());

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["total_amount"], 2997);
        assert_eq!(json["items"][0]["price_at_order_time"], 999);

        let back: domain::Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
