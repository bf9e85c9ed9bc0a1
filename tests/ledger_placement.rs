//! Ledger-protocol order placement end to end through the client.

mod common;

use common::MockLedger;
use dojima::adapter::ledger::{LedgerConfig, LedgerFault, LedgerMarket};
use dojima::adapter::Exchange;
use dojima::client::DojimaClient;
use dojima::error::ExchangeError;
use dojima::request::LedgerOp;
use dojima::shared::{AssetId, HostId, MarketId, OrderId, Side};
use dojima::state::StateChange;
use rust_decimal::Decimal;
use serde_json::json;

fn market() -> MarketId {
    MarketId::from("gold-usd")
}

fn config() -> LedgerConfig {
    LedgerConfig {
        name: "ot".into(),
        server_id: HostId::from("ot-server"),
        nym_id: "nym-1".into(),
        markets: vec![LedgerMarket {
            market_id: market(),
            base_asset: AssetId::from("gold"),
            counter_asset: AssetId::from("usd"),
            base_account: "gold-acct".into(),
            counter_account: "usd-acct".into(),
            scale: 1,
        }],
        ..LedgerConfig::default()
    }
}

#[tokio::test]
async fn test_low_pool_replenishes_before_offer_is_queued() {
    let session = MockLedger::new(2);
    let client = DojimaClient::builder().build();
    let ledger = client.add_ledger(config(), session.clone()).await.unwrap();
    let mut events = client.events();

    let id = ledger
        .place_order(&market(), Side::Ask, "1.50000000", "99.99")
        .await
        .unwrap();

    assert_eq!(
        session.ops(),
        [LedgerOp::GetTransactionNumber, LedgerOp::IssueMarketOffer]
    );
    assert_eq!(session.pool(), 11);

    let args = session.args(LedgerOp::IssueMarketOffer).unwrap();
    assert_eq!(args.get("total_assets").map(String::as_str), Some("1.5"));
    assert_eq!(args.get("price_limit").map(String::as_str), Some("99.99"));
    assert_eq!(args.get("selling").map(String::as_str), Some("true"));
    assert_eq!(args.get("nym_id").map(String::as_str), Some("nym-1"));

    let orders = client.store().open_orders(&market()).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_id, id);
    assert_eq!(orders[0].outstanding, Decimal::new(15, 1));
    assert!(matches!(events.recv().await.unwrap(), StateChange::OrderAdded { .. }));

    ledger.cancel_order(&market(), &id).await.unwrap();
    assert!(client.store().open_orders(&market()).await.is_empty());
    assert_eq!(
        events.recv().await.unwrap(),
        StateChange::OrderRemoved {
            market: market(),
            order_id: id
        }
    );
}

#[tokio::test]
async fn test_order_absent_until_confirmed() {
    let session = MockLedger::new(5);
    session.fail(LedgerOp::IssueMarketOffer, LedgerFault::Rejected("insufficient funds".into()));
    let client = DojimaClient::builder().build();
    let ledger = client.add_ledger(config(), session.clone()).await.unwrap();

    let err = ledger
        .place_order(&market(), Side::Bid, "1", "2")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("insufficient funds"));
    assert!(client.store().open_orders(&market()).await.is_empty());
}

#[tokio::test]
async fn test_repeated_sequence_failure_is_fatal() {
    let session = MockLedger::new(5);
    session.fail(LedgerOp::IssueMarketOffer, LedgerFault::OutOfSequence);
    session.fail(LedgerOp::IssueMarketOffer, LedgerFault::OutOfSequence);
    let client = DojimaClient::builder().build();
    let ledger = client.add_ledger(config(), session.clone()).await.unwrap();

    let err = ledger
        .place_order(&market(), Side::Bid, "1", "2")
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::SequenceLost(_)));
    assert_eq!(
        session.ops(),
        [
            LedgerOp::IssueMarketOffer,
            LedgerOp::GetRequestNumber,
            LedgerOp::IssueMarketOffer
        ]
    );
    assert!(ledger.is_session_lost());
    assert!(client.store().open_orders(&market()).await.is_empty());
}

#[tokio::test]
async fn test_cancel_uses_the_offers_own_account() {
    let session = MockLedger::new(5);
    let client = DojimaClient::builder().build();
    let ledger = client.add_ledger(config(), session.clone()).await.unwrap();

    // Issued from the configured account.
    let first = ledger.place_order(&market(), Side::Ask, "1", "2").await.unwrap();
    ledger.cancel_order(&market(), &first).await.unwrap();
    let args = session.args(LedgerOp::CancelOffer).unwrap();
    assert_eq!(args.get("asset_account_id").map(String::as_str), Some("gold-acct"));
    assert_eq!(args.get("transaction_id").map(String::as_str), Some(first.as_str()));

    // Listed by the server under an account that is no longer configured.
    session.reply(
        LedgerOp::GetNymOpenOffers,
        json!({"offers": [{
            "transaction_id": 77, "asset_type_id": "gold", "currency_type_id": "usd",
            "scale": 1, "price_per_scale": "2", "minimum_increment": "1",
            "total_assets": "1", "finished_so_far": "0", "selling": true,
            "asset_acct_id": "old-gold-acct"
        }]}),
    );
    ledger.refresh_open_orders(&market()).await.unwrap();
    ledger.cancel_order(&market(), &OrderId::from("77")).await.unwrap();
    let args = session.args(LedgerOp::CancelOffer).unwrap();
    assert_eq!(args.get("asset_account_id").map(String::as_str), Some("old-gold-acct"));
    assert!(client.store().open_orders(&market()).await.is_empty());
}

#[tokio::test]
async fn test_invalid_amount_rejected_before_any_call() {
    let session = MockLedger::new(0);
    let client = DojimaClient::builder().build();
    let ledger = client.add_ledger(config(), session.clone()).await.unwrap();

    for (amount, price) in [("-1", "2"), ("1", "0"), ("abc", "1")] {
        assert!(matches!(
            ledger.place_order(&market(), Side::Bid, amount, price).await,
            Err(ExchangeError::Validation(_))
        ));
    }
    assert!(session.ops().is_empty());
    assert!(ledger
        .cancel_order(&market(), &OrderId::from("never-placed"))
        .await
        .is_ok());
    assert!(session.ops().is_empty());
}
