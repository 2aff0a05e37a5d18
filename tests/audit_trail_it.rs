mod common;

use std::sync::Arc;

use common::*;
use locate_engine::domain::{Origin, TransactionFeeType};
use locate_engine::service::{EngineParts, LocateEngine, LocateRequest};
use rust_decimal_macros::dec;

#[tokio::test]
async fn every_calculation_leaves_an_audit_record() {
    let harness = harness();
    let request = LocateRequest {
        request_id: Some("req-abc".to_string()),
        ..locate_request("AAPL", dec!(100000), 30, "standard")
    };
    let breakdown = harness.engine.calculate_fee(request).await.unwrap();

    let records = wait_for_records(&harness.sink, 1).await;
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.request_id, "req-abc");
    assert_eq!(record.ticker.as_str(), "AAPL");
    assert_eq!(record.client_id.as_str(), "standard");
    assert_eq!(record.position_value, dec!(100000));
    assert_eq!(record.loan_days, 30);
    assert_eq!(record.borrow_rate_used, breakdown.borrow_rate_used);
    assert_eq!(record.breakdown, breakdown);
    assert_eq!(record.fee_model, TransactionFeeType::Flat);
    assert_eq!(record.provenance.base, Origin::Live);
    assert_eq!(record.provenance.event, Origin::Absent);
}

#[tokio::test]
async fn missing_request_id_gets_generated() {
    let harness = harness();
    harness
        .engine
        .calculate_fee(locate_request("AAPL", dec!(100000), 30, "standard"))
        .await
        .unwrap();

    let records = wait_for_records(&harness.sink, 1).await;
    assert!(!records[0].request_id.is_empty());
}

#[tokio::test]
async fn fallback_substitutions_show_up_in_provenance() {
    let harness = harness();
    harness.lender.set(LenderBehavior::Down);

    harness
        .engine
        .calculate_fee(locate_request("GME", dec!(50000), 15, "premium"))
        .await
        .unwrap();

    let records = wait_for_records(&harness.sink, 1).await;
    assert_eq!(records[0].provenance.base, Origin::Fallback);
    assert_eq!(records[0].fee_model, TransactionFeeType::Percentage);
}

#[tokio::test]
async fn calculation_cache_hits_are_audited_too() {
    let harness = harness();
    let request = locate_request("AAPL", dec!(100000), 30, "standard");

    harness.engine.calculate_fee(request.clone()).await.unwrap();
    harness.engine.calculate_fee(request).await.unwrap();

    let records = wait_for_records(&harness.sink, 2).await;
    assert_eq!(records.len(), 2);
    // The cached answer audits with the provenance it was computed under.
    assert_eq!(records[0].provenance, records[1].provenance);
    assert_eq!(records[0].breakdown, records[1].breakdown);
}

#[tokio::test]
async fn a_failing_sink_never_fails_the_response() {
    let store = seeded_store();
    let engine = LocateEngine::assemble(EngineParts {
        settings: test_settings(),
        cache_backend: Arc::new(locate_engine::cache::MemoryCache::new()),
        stocks: store.clone(),
        clients: store,
        lender: Arc::new(StubLender::quoting(
            dec!(0.05),
            locate_engine::domain::BorrowStatus::Easy,
        )),
        volatility: Arc::new(StubVolatility::reading(dec!(15), dec!(20))),
        events: Arc::new(StubEvents::with(EventBehavior::NoEvents)),
        sink: Arc::new(RejectingSink),
    });

    let breakdown = engine
        .calculate_fee(locate_request("AAPL", dec!(100000), 30, "standard"))
        .await
        .unwrap();
    assert!(breakdown.is_consistent());
}

#[tokio::test]
async fn audit_ids_are_unique_per_record() {
    let harness = harness();
    for days in 1..=3 {
        harness
            .engine
            .calculate_fee(locate_request("AAPL", dec!(100000), days, "standard"))
            .await
            .unwrap();
    }

    let records = wait_for_records(&harness.sink, 3).await;
    let mut ids: Vec<_> = records.iter().map(|record| record.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}
