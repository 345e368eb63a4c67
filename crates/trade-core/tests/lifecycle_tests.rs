//! End-to-end tests for the trade lifecycle engine: dispatch,
//! reconciliation, notifications, refunds, credit and activation
//! payments, and commission issuance.

mod common;

use common::{credits_request, payer, plain_request, setup, test_config, CreateBehavior};
use gateway_client::{GatewayStatus, HttpGateway};
use ledger_store::{
    ActivationCode, CardType, CreditProduct, LedgerStore, PaymentChannel, PaymentStatus, Trade,
    TradeType,
};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use trade_core::{NotificationAck, TradeError, TradeLifecycle};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Create, dispatch and settle a 100-credit recharge trade.
async fn settled_credits_trade(
    engine: &TradeLifecycle,
    gateway: &common::FakeGateway,
    user_id: u64,
) -> String {
    let trade = engine
        .create_trade(credits_request(user_id, PaymentChannel::AlipayQr))
        .await
        .unwrap();
    engine
        .dispatch_to_gateway(&trade.trade_no, &payer(user_id), None)
        .await
        .unwrap();
    gateway.set_query(GatewayStatus::Succeeded);
    let settled = engine.reconcile(&trade.trade_no).await.unwrap();
    assert_eq!(settled.payment_status, PaymentStatus::Success);
    trade.trade_no
}

#[tokio::test]
async fn test_create_trade_starts_pending() {
    let (_, _, engine) = setup();
    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();

    assert_eq!(trade.payment_status, PaymentStatus::Pending);
    assert!(trade.payment_id.is_none());
    assert!(trade.paid_at.is_none());
    assert!(trade.trade_no.starts_with('T'));
}

#[tokio::test]
async fn test_dispatch_assigns_payment_id_once() {
    let (_, gateway, engine) = setup();
    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();

    let handle = engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap();
    assert_eq!(handle.payment_id, "pay_1");
    assert_eq!(handle.pay_info.as_deref(), Some("weixin://pay/fake"));

    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_id.as_deref(), Some("pay_1"));

    // A second dispatch must not reach the gateway again.
    let err = engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::DuplicateOperation(_)));
    assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_dispatch_reaches_gateway_once() {
    let (_, gateway, engine) = setup();
    gateway.set_create_delay(Duration::from_millis(100));

    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        let trade_no = trade.trade_no.clone();
        handles.push(tokio::spawn(async move {
            engine.dispatch_to_gateway(&trade_no, &payer(1), None).await
        }));
    }

    let mut dispatched = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => dispatched += 1,
            Err(TradeError::DuplicateOperation(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(dispatched, 1);

    // The non-idempotent create call went out exactly once.
    assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dispatch_rejection_marks_failed() {
    let (_, gateway, engine) = setup();
    gateway.set_create(CreateBehavior::FailStatus("channel not enabled".into()));

    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::WxQr))
        .await
        .unwrap();
    let err = engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Gateway(ref m) if m == "channel not enabled"));

    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("channel not enabled"));
}

#[tokio::test]
async fn test_dispatch_api_error_marks_failed() {
    let (_, gateway, engine) = setup();
    gateway.set_create(CreateBehavior::Error("internal error".into()));

    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::Alipay))
        .await
        .unwrap();
    let err = engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Gateway(_)));

    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_dispatch_rejects_internal_channels() {
    let (_, gateway, engine) = setup();
    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::Credit))
        .await
        .unwrap();

    let err = engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::InvalidState(_)));
    assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dispatch_timeout_leaves_trade_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(serde_json::json!({ "status": "succeeded", "id": "pay_1" })),
        )
        .mount(&server)
        .await;

    let store = LedgerStore::new();
    let gateway =
        HttpGateway::new(server.uri(), "k", "app_1", Duration::from_millis(50)).unwrap();
    let engine = TradeLifecycle::new(store, Arc::new(gateway), test_config());

    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();
    let err = engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Gateway(_)));

    // Intent may exist gateway-side; the trade must stay pending for
    // reconcile, not flip to failed.
    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.payment_id.is_none());
}

#[tokio::test]
async fn test_reconcile_settles_and_grants_credits() {
    let (store, gateway, engine) = setup();
    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;

    assert_eq!(store.balance(1).await, 100);
    let records = store.credit_records(1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].credits, 100);

    let order = store
        .read(|d| d.recharge_order_for_trade(&trade_no).cloned())
        .await
        .unwrap();
    assert_eq!(order.credits, 100);
    assert_eq!(order.product_id, 1);

    let stored = engine.trade(&trade_no).await.unwrap();
    assert!(stored.paid_at.is_some());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let (store, gateway, engine) = setup();
    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;
    let queries_after_settle = gateway.query_calls.load(Ordering::SeqCst);

    let again = engine.reconcile(&trade_no).await.unwrap();
    assert_eq!(again.payment_status, PaymentStatus::Success);

    // Terminal trades never hit the gateway or re-grant credits.
    assert_eq!(gateway.query_calls.load(Ordering::SeqCst), queries_after_settle);
    assert_eq!(store.balance(1).await, 100);
    assert_eq!(store.credit_records(1).await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_reconcile_settles_once() {
    let (store, gateway, engine) = setup();
    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();
    engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap();
    gateway.set_query(GatewayStatus::Succeeded);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let trade_no = trade.trade_no.clone();
        handles.push(tokio::spawn(async move {
            engine.reconcile(&trade_no).await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.payment_status, PaymentStatus::Success);
    }

    // Settlement effects applied exactly once.
    assert_eq!(store.balance(1).await, 100);
    assert_eq!(store.credit_records(1).await.len(), 1);
}

#[tokio::test]
async fn test_reconcile_failed_payment() {
    let (_, gateway, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();
    engine
        .dispatch_to_gateway(&trade.trade_no, &payer(1), None)
        .await
        .unwrap();
    gateway.set_query(GatewayStatus::Failed);

    let result = engine.reconcile(&trade.trade_no).await.unwrap();
    assert_eq!(result.payment_status, PaymentStatus::Failed);
    assert_eq!(
        result.failure_reason.as_deref(),
        Some("customer abandoned payment")
    );
}

#[tokio::test]
async fn test_reconcile_undispatched_trade_is_noop() {
    let (_, gateway, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();

    let result = engine.reconcile(&trade.trade_no).await.unwrap();
    assert_eq!(result.payment_status, PaymentStatus::Pending);
    assert_eq!(gateway.query_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_notification_settles_trade() {
    let (store, gateway, engine) = setup();
    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::WxPub))
        .await
        .unwrap();

    let payload = gateway.signed_notification(&trade.trade_no, "succeeded");
    let ack = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(ack, NotificationAck::Applied);

    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Success);
    assert_eq!(store.balance(1).await, 100);

    // Gateways redeliver; a second delivery is absorbed.
    let ack = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(ack, NotificationAck::Duplicate);
    assert_eq!(store.balance(1).await, 100);
}

#[tokio::test]
async fn test_notification_bad_signature_rejected() {
    let (store, gateway, engine) = setup();
    let trade = engine
        .create_trade(credits_request(1, PaymentChannel::WxPub))
        .await
        .unwrap();

    let mut payload = gateway.signed_notification(&trade.trade_no, "succeeded");
    payload.insert("sign".into(), Value::String("deadbeef".into()));

    let err = engine.handle_notification(&payload).await.unwrap_err();
    assert!(matches!(err, TradeError::SignatureInvalid));

    // Nothing was mutated.
    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(store.balance(1).await, 0);
}

#[tokio::test]
async fn test_notification_failure_status() {
    let (_, gateway, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::WxPub))
        .await
        .unwrap();

    let payload = gateway.signed_notification(&trade.trade_no, "failed");
    let ack = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(ack, NotificationAck::Applied);

    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_notification_unknown_status_ignored() {
    let (_, gateway, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::WxPub))
        .await
        .unwrap();

    let payload = gateway.signed_notification(&trade.trade_no, "processing");
    let ack = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(ack, NotificationAck::Ignored);

    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_pay_with_credits() {
    let (store, _, engine) = setup();
    store
        .commit(|d| {
            d.apply_credits(
                1,
                200,
                ledger_store::CreditRecordType::Recharge,
                "seed",
                ledger_store::Shortfall::Fail,
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::Credit))
        .await
        .unwrap();
    let paid = engine.pay_with_credits(&trade.trade_no, 1).await.unwrap();

    assert_eq!(paid.payment_status, PaymentStatus::Success);
    assert!(paid.paid_at.is_some());
    // 10.00 at 10 credits per unit.
    assert_eq!(store.balance(1).await, 100);
}

#[tokio::test]
async fn test_pay_with_credits_insufficient_balance() {
    let (store, _, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::Credit))
        .await
        .unwrap();

    let err = engine.pay_with_credits(&trade.trade_no, 1).await.unwrap_err();
    assert!(matches!(
        err,
        TradeError::InsufficientBalance {
            required: 100,
            available: 0
        }
    ));

    // Trade and balance untouched.
    let stored = engine.trade(&trade.trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(store.credit_records(1).await.is_empty());
}

#[tokio::test]
async fn test_refund_credit_channel_returns_credits() {
    let (store, _, engine) = setup();
    store
        .commit(|d| {
            d.apply_credits(
                1,
                200,
                ledger_store::CreditRecordType::Recharge,
                "seed",
                ledger_store::Shortfall::Fail,
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::Credit))
        .await
        .unwrap();
    engine.pay_with_credits(&trade.trade_no, 1).await.unwrap();
    assert_eq!(store.balance(1).await, 100);

    let refunded = engine.refund(&trade.trade_no, "user request").await.unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(store.balance(1).await, 200);
}

#[tokio::test]
async fn test_refund_requires_success() {
    let (_, _, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();

    let err = engine.refund(&trade.trade_no, "user request").await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidState(_)));
}

#[tokio::test]
async fn test_gateway_refund_claws_back_credits() {
    let (store, gateway, engine) = setup();
    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;
    assert_eq!(store.balance(1).await, 100);

    let refunded = engine.refund(&trade_no, "user request").await.unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(gateway.refund_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.balance(1).await, 0);
}

#[tokio::test]
async fn test_gateway_refund_failure_leaves_trade_settled() {
    let (store, gateway, engine) = setup();
    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;
    gateway.set_refund(GatewayStatus::Failed);

    let err = engine.refund(&trade_no, "user request").await.unwrap_err();
    assert!(matches!(err, TradeError::Gateway(ref m) if m == "refund window closed"));

    // No money moved, no compensation applied.
    let stored = engine.trade(&trade_no).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Success);
    assert_eq!(store.balance(1).await, 100);
}

#[tokio::test]
async fn test_gateway_refund_clawback_floors_at_zero() {
    let (store, gateway, engine) = setup();
    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;

    // The user spends most of the granted credits before the refund.
    store
        .commit(|d| {
            d.apply_credits(
                1,
                -70,
                ledger_store::CreditRecordType::Consume,
                "consume",
                ledger_store::Shortfall::Fail,
            )?;
            Ok(())
        })
        .await
        .unwrap();

    engine.refund(&trade_no, "user request").await.unwrap();
    assert_eq!(store.balance(1).await, 0);
}

#[tokio::test]
async fn test_gateway_refund_missing_recharge_order() {
    let (store, _, engine) = setup();

    // A settled creditable trade with no recharge order on record.
    store
        .commit(|d| {
            let mut trade = Trade::new(
                "T_orphan",
                1,
                1000,
                TradeType::Recharge,
                PaymentChannel::AlipayQr,
                "100 credit pack",
                Some(ledger_store::TradeMetadata::Product(
                    ledger_store::ProductInfo::Credits {
                        product_id: 1,
                        credits: 100,
                    },
                )),
            );
            trade.payment_status = PaymentStatus::Success;
            trade.payment_id = Some("pay_x".into());
            d.insert_trade(trade)
        })
        .await
        .unwrap();

    let err = engine.refund("T_orphan", "user request").await.unwrap_err();
    assert!(matches!(err, TradeError::NotFound(_)));

    // The rolled-back refund leaves the trade settled.
    let stored = engine.trade("T_orphan").await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_redeem_activation_code_grants_credits() {
    let (store, _, engine) = setup();
    store
        .insert_credit_product(CreditProduct {
            id: 3,
            name: "starter pack".into(),
            credits: 300,
            price_cents: 3000,
        })
        .await
        .unwrap();
    store
        .insert_activation_code(ActivationCode::new("GIFT300", CardType::Credits, 3))
        .await
        .unwrap();

    let trade = engine.redeem_activation_code("GIFT300", 5).await.unwrap();
    assert_eq!(trade.payment_status, PaymentStatus::Success);
    assert_eq!(trade.payment_channel, PaymentChannel::Activation);
    assert_eq!(store.balance(5).await, 300);

    let code = store.get_activation_code("GIFT300").await.unwrap();
    assert!(code.is_used);
    assert_eq!(code.used_by, Some(5));
    assert_eq!(code.trade_no.as_deref(), Some(trade.trade_no.as_str()));

    let order = store
        .read(|d| d.recharge_order_for_trade(&trade.trade_no).cloned())
        .await
        .unwrap();
    assert_eq!(order.credits, 300);
}

#[tokio::test]
async fn test_concurrent_redeem_single_winner() {
    let (store, _, engine) = setup();
    store
        .insert_credit_product(CreditProduct {
            id: 3,
            name: "starter pack".into(),
            credits: 300,
            price_cents: 3000,
        })
        .await
        .unwrap();
    store
        .insert_activation_code(ActivationCode::new("GIFT300", CardType::Credits, 3))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for user_id in 1..=4u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.redeem_activation_code("GIFT300", user_id).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(TradeError::InvalidState(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);

    // Exactly one grant across all users.
    let mut total = 0;
    for user_id in 1..=4u64 {
        total += store.balance(user_id).await;
    }
    assert_eq!(total, 300);
}

#[tokio::test]
async fn test_refund_activation_reverts_code_and_floors_debit() {
    let (store, _, engine) = setup();
    store
        .insert_credit_product(CreditProduct {
            id: 3,
            name: "starter pack".into(),
            credits: 300,
            price_cents: 3000,
        })
        .await
        .unwrap();
    store
        .insert_activation_code(ActivationCode::new("GIFT300", CardType::Credits, 3))
        .await
        .unwrap();

    let trade = engine.redeem_activation_code("GIFT300", 5).await.unwrap();

    // The user spends 250 of the 300 before the refund.
    store
        .commit(|d| {
            d.apply_credits(
                5,
                -250,
                ledger_store::CreditRecordType::Consume,
                "consume",
                ledger_store::Shortfall::Fail,
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let refunded = engine.refund(&trade.trade_no, "support revert").await.unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);

    // Clawback floors at zero and the code is usable again.
    assert_eq!(store.balance(5).await, 0);
    let code = store.get_activation_code("GIFT300").await.unwrap();
    assert!(!code.is_used);
    assert_eq!(code.used_by, None);

    let again = engine.redeem_activation_code("GIFT300", 6).await.unwrap();
    assert_eq!(again.payment_status, PaymentStatus::Success);
}

#[tokio::test]
async fn test_commission_issued_once_for_invited_payer() {
    let (store, gateway, engine) = setup();
    store.set_invitation(1, 42).await.unwrap();

    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;

    let commissions = store.commissions_for(42).await;
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].invitee, 1);
    assert_eq!(commissions[0].trade_no, trade_no);
    // 15% of 10.00.
    assert_eq!(commissions[0].amount_cents, 150);

    // Re-reconciling a settled trade must not duplicate it.
    engine.reconcile(&trade_no).await.unwrap();
    assert_eq!(store.commissions_for(42).await.len(), 1);
}

#[tokio::test]
async fn test_no_commission_without_inviter() {
    let (store, gateway, engine) = setup();
    settled_credits_trade(&engine, &gateway, 1).await;
    assert!(store.read(|d| d.commission_records.is_empty()).await);
}

#[tokio::test]
async fn test_cancel_trade() {
    let (_, _, engine) = setup();
    let trade = engine
        .create_trade(plain_request(1, PaymentChannel::AlipayQr))
        .await
        .unwrap();

    engine.cancel_trade(&trade.trade_no).await.unwrap();
    let err = engine.trade(&trade.trade_no).await.unwrap_err();
    assert!(matches!(err, TradeError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_settled_trade_rejected() {
    let (_, gateway, engine) = setup();
    let trade_no = settled_credits_trade(&engine, &gateway, 1).await;

    let err = engine.cancel_trade(&trade_no).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidState(_)));
    assert!(engine.trade(&trade_no).await.is_ok());
}
