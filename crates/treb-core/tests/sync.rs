//! Tests for reconciliation against the chain and the Safe service.

mod support;

use std::sync::Arc;

use chrono::Utc;
use support::{
    FakeChain, FakeSafe, addr, deployed, deployment, executed_safe_state, pending_safe_state,
    proposed, queued_safe, store_with,
};
use treb_core::clients::ReceiptStatus;
use treb_core::ingest::{IngestContext, ingest_result};
use treb_core::registry::RegistryStore;
use treb_core::sync::{SyncEngine, SyncOptions, SyncReport};
use treb_core::types::{SafeTxStatus, Transaction, TransactionStatus};

fn transaction(hash: &str, status: TransactionStatus) -> Transaction {
    Transaction {
        id: Transaction::id_for_hash(hash),
        chain_id: 1,
        hash: hash.to_string(),
        status,
        block_number: None,
        sender: addr("de"),
        nonce: Some(0),
        deployments: Vec::new(),
        operations: Vec::new(),
        safe_context: None,
        created_at: Utc::now(),
    }
}

fn engine(chain: &Arc<FakeChain>, safe: &Arc<FakeSafe>) -> SyncEngine {
    SyncEngine::new(chain.clone(), safe.clone())
}

fn signers(store: &RegistryStore, hash: &str) -> Vec<String> {
    let mut signers: Vec<String> = store
        .safe_transaction(hash)
        .expect("safe transaction should exist")
        .confirmations
        .iter()
        .map(|c| c.signer.clone())
        .collect();
    signers.sort();
    signers
}

#[tokio::test]
async fn test_confirmations_are_merged_while_queued() {
    let mut store = RegistryStore::in_memory();
    store
        .put_safe_transaction(queued_safe(1, "0xsafe", &["tx-0xsafe-0"]))
        .expect("fixture should store");
    let chain = Arc::new(FakeChain::new());
    let safe = Arc::new(FakeSafe::new().state("0xsafe", pending_safe_state(&["sig1", "sig2"])));

    let report = engine(&chain, &safe).sync(&mut store).await;

    assert_eq!(report.safe_checked, 1);
    assert_eq!(report.confirmations_added, 1);
    assert_eq!(report.updated, vec!["0xsafe"]);
    assert_eq!(signers(&store, "0xsafe"), vec!["sig1", "sig2"]);
    assert_eq!(
        store.safe_transaction("0xsafe").map(|s| s.status),
        Some(SafeTxStatus::Queued)
    );
}

#[tokio::test]
async fn test_observed_confirmations_never_drop_recorded_ones() {
    let mut store = RegistryStore::in_memory();
    store
        .put_safe_transaction(queued_safe(1, "0xsafe", &[]))
        .expect("fixture should store");
    let chain = Arc::new(FakeChain::new());
    let safe = Arc::new(FakeSafe::new().state("0xsafe", pending_safe_state(&["sig2"])));

    engine(&chain, &safe).sync(&mut store).await;

    assert_eq!(signers(&store, "0xsafe"), vec!["sig1", "sig2"]);
}

#[tokio::test]
async fn test_executed_batch_settles_its_transactions() {
    let mut store = RegistryStore::in_memory();
    store
        .put_safe_transaction(queued_safe(1, "0xsafe", &["tx-0xsafe-0", "tx-0xsafe-1"]))
        .expect("fixture should store");
    let chain = Arc::new(FakeChain::new());
    let safe = Arc::new(
        FakeSafe::new()
            .state("0xsafe", pending_safe_state(&["sig1", "sig2"]))
            .state("0xsafe", executed_safe_state(&["sig1", "sig2"], "0xTX")),
    );
    let engine = engine(&chain, &safe);

    engine.sync(&mut store).await;
    assert_eq!(
        store.safe_transaction("0xsafe").map(|s| s.status),
        Some(SafeTxStatus::Queued)
    );

    let report = engine.sync(&mut store).await;

    assert_eq!(report.safe_executed, 1);
    let safe_tx = store.safe_transaction("0xsafe").expect("safe transaction");
    assert_eq!(safe_tx.status, SafeTxStatus::Executed);
    assert_eq!(safe_tx.execution_tx_hash.as_deref(), Some("0xTX"));
    assert!(safe_tx.executed_at.is_some());
    for id in ["tx-0xsafe-0", "tx-0xsafe-1"] {
        let tx = store.transaction(id).expect("batch transaction should exist");
        assert_eq!(tx.status, TransactionStatus::Executed, "{id}");
        assert_eq!(tx.hash, "0xTX");
    }
    assert_eq!(store.queued_safe_transactions().count(), 0);
    assert_eq!(store.pending_transactions().count(), 0);
}

#[tokio::test]
async fn test_second_sync_without_external_change_is_a_no_op() {
    let mut store = RegistryStore::in_memory();
    store
        .put_safe_transaction(queued_safe(1, "0xsafe", &["tx-0xsafe-0"]))
        .expect("fixture should store");
    store
        .put_safe_transaction(queued_safe(1, "0xother", &[]))
        .expect("fixture should store");
    let chain = Arc::new(FakeChain::new());
    let safe = Arc::new(
        FakeSafe::new()
            .state("0xsafe", executed_safe_state(&["sig1", "sig2"], "0xTX"))
            .state("0xother", pending_safe_state(&["sig1"])),
    );
    let engine = engine(&chain, &safe);

    let first = engine.sync(&mut store).await;
    assert!(first.has_changes());
    let snapshot = store.records().clone();

    let second = engine.sync(&mut store).await;

    assert!(!second.has_changes(), "{second:?}");
    assert_eq!(store.records(), &snapshot);
    // The settled batch is no longer queried.
    assert_eq!(
        safe.calls().iter().filter(|h| h.as_str() == "0xsafe").count(),
        1
    );
}

#[tokio::test]
async fn test_failed_execution_marks_batch_failed() {
    let mut store = RegistryStore::in_memory();
    store
        .put_safe_transaction(queued_safe(1, "0xsafe", &["tx-0xsafe-0"]))
        .expect("fixture should store");
    let mut state = executed_safe_state(&["sig1", "sig2"], "0xTX");
    state.is_successful = Some(false);
    let chain = Arc::new(FakeChain::new());
    let safe = Arc::new(FakeSafe::new().state("0xsafe", state));

    let report = engine(&chain, &safe).sync(&mut store).await;

    assert_eq!(report.safe_failed, 1);
    assert_eq!(
        store.safe_transaction("0xsafe").map(|s| s.status),
        Some(SafeTxStatus::Failed)
    );
    assert_eq!(
        store.transaction("tx-0xsafe-0").map(|t| t.status),
        Some(TransactionStatus::Failed)
    );
}

#[tokio::test]
async fn test_service_errors_leave_records_untouched() {
    let mut store = RegistryStore::in_memory();
    store
        .put_safe_transaction(queued_safe(1, "0xsafe", &[]))
        .expect("fixture should store");
    store
        .put_transaction(transaction("0xp1", TransactionStatus::Pending))
        .expect("fixture should store");
    let before = store.records().clone();
    let chain = Arc::new(FakeChain::new().unavailable());
    let safe = Arc::new(FakeSafe::new().error("0xsafe", "503 Service Unavailable"));

    let report = engine(&chain, &safe).sync(&mut store).await;

    assert_eq!(store.records(), &before);
    assert!(!report.has_changes());
    assert_eq!(report.warnings.len(), 2);
    assert!(
        report
            .warnings
            .contains(&"0xsafe: safe-api error: 503 Service Unavailable".to_string())
    );
    assert!(
        report
            .warnings
            .contains(&"tx-0xp1: rpc error: connection refused".to_string())
    );
}

#[tokio::test]
async fn test_pending_transactions_follow_their_receipts() {
    let mut store = RegistryStore::in_memory();
    for hash in ["0xp1", "0xp2", "0xp3"] {
        store
            .put_transaction(transaction(hash, TransactionStatus::Pending))
            .expect("fixture should store");
    }
    let chain = Arc::new(
        FakeChain::new()
            .receipt("0xp1", ReceiptStatus::Success { block_number: Some(42) })
            .receipt("0xp2", ReceiptStatus::Reverted { block_number: Some(43) }),
    );
    let safe = Arc::new(FakeSafe::new());

    let report = engine(&chain, &safe).sync(&mut store).await;

    assert_eq!(report.transactions_checked, 3);
    assert_eq!(report.transactions_executed, 1);
    assert_eq!(report.transactions_failed, 1);
    let p1 = store.transaction("tx-0xp1").expect("p1");
    assert_eq!(p1.status, TransactionStatus::Executed);
    assert_eq!(p1.block_number, Some(42));
    assert_eq!(
        store.transaction("tx-0xp2").map(|t| t.status),
        Some(TransactionStatus::Failed)
    );
    assert_eq!(
        store.transaction("tx-0xp3").map(|t| t.status),
        Some(TransactionStatus::Pending)
    );
    let pending: Vec<&str> = store.pending_transactions().map(|t| t.id.as_str()).collect();
    assert_eq!(pending, vec!["tx-0xp3"]);
}

#[tokio::test]
async fn test_clean_prunes_records_the_chain_disowns() {
    let mut store = store_with(vec![
        deployment("prod", 1, "Token", &addr("aa")),
        deployment("prod", 1, "Ghost", &addr("bb")),
    ]);
    store
        .put_transaction(transaction("0xgone", TransactionStatus::Executed))
        .expect("fixture should store");
    store
        .put_transaction(transaction("0xkept", TransactionStatus::Executed))
        .expect("fixture should store");
    let chain = Arc::new(
        FakeChain::new()
            .code(&addr("bb"), false)
            .receipt("0xkept", ReceiptStatus::Success { block_number: Some(1) }),
    );
    let safe = Arc::new(FakeSafe::new());

    let report: SyncReport = engine(&chain, &safe)
        .with_options(SyncOptions {
            clean: true,
            ..SyncOptions::default()
        })
        .sync(&mut store)
        .await;

    assert_eq!(report.pruned.deployments, vec!["prod/1/Ghost"]);
    assert_eq!(report.pruned.transactions, vec!["tx-0xgone"]);
    assert!(store.deployment("prod/1/Token").is_some());
    assert!(store.get_by_address(1, &addr("bb")).is_none());
    assert!(store.transaction("tx-0xkept").is_some());
    assert_eq!(store.lookups(), &store.rebuild_lookups());
}

#[tokio::test]
async fn test_clean_without_chain_access_prunes_nothing() {
    let mut store = store_with(vec![deployment("prod", 1, "Token", &addr("aa"))]);
    let chain = Arc::new(FakeChain::new().unavailable());
    let safe = Arc::new(FakeSafe::new());

    let report = engine(&chain, &safe).clean(&mut store).await;

    assert_eq!(report.pruned.total(), 0);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(store.all_deployments().count(), 1);
}

#[tokio::test]
async fn test_clean_keeps_deployments_awaiting_execution() {
    let mut store = RegistryStore::in_memory();
    let ctx = IngestContext::new("staging", 11155111);
    ingest_result(
        &mut store,
        &ctx,
        &proposed("0xSAFE", &[("Timelock", &addr("71"))]),
    )
    .expect("proposal should ingest");
    ingest_result(&mut store, &ctx, &deployed("Ghost", &addr("bb"), "0xghost"))
        .expect("broadcast should ingest");
    let chain = Arc::new(
        FakeChain::new()
            .code(&addr("71"), false)
            .code(&addr("bb"), false)
            .receipt("0xghost", ReceiptStatus::Success { block_number: Some(9) }),
    );
    let safe = Arc::new(FakeSafe::new());

    let report = engine(&chain, &safe).clean(&mut store).await;

    assert_eq!(report.pruned.deployments, vec!["staging/11155111/Ghost"]);
    assert!(store.deployment("staging/11155111/Timelock").is_some());
    assert_eq!(
        store.transaction("tx-0xsafe-0").map(|t| t.deployments.clone()),
        Some(vec!["staging/11155111/Timelock".to_string()])
    );
    let broadcast = store.transaction("tx-0xghost").expect("receipt keeps the transaction");
    assert!(broadcast.deployments.is_empty());
    assert!(
        !chain
            .calls()
            .iter()
            .any(|call| call.contains(&addr("71").to_ascii_lowercase()))
    );
}
