//! End-to-end workflow scenarios against mock devices
//!
//! Each test runs one request through a dispatch loop and checks device
//! rows, the aggregate row, and what the mock devices saw.

use std::sync::Arc;

use emcp_common::{OrderType, TransactionStatus};
use emcp_provisiond::Dispatcher;
use emcp_store::{MemoryStore, TransactionStore};
use emcp_test::{context, device_names, FailingStore, MockBehavior, MockDriverFactory, PayloadBuilder};
use pretty_assertions::assert_eq;

fn setup() -> (Arc<MemoryStore>, Arc<MockDriverFactory>) {
    (Arc::new(MemoryStore::new()), Arc::new(MockDriverFactory::new()))
}

async fn device_status(store: &dyn TransactionStore, tx: &str, device: &str) -> TransactionStatus {
    store
        .read_device_status(tx, device)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no row for {}", device))
        .status
}

async fn aggregate(store: &dyn TransactionStore, tx: &str) -> TransactionStatus {
    store.read_transaction(tx).await.unwrap().unwrap().status
}

/// Scenario A: 3 devices, every step succeeds.
#[tokio::test]
async fn test_scenario_a_all_devices_complete() {
    let (store, factory) = setup();
    let names = device_names("leaf", 3);
    let probes: Vec<_> = names
        .iter()
        .map(|name| factory.device(name, MockBehavior::new()))
        .collect();
    let payload = names
        .iter()
        .fold(PayloadBuilder::new(), |builder, name| builder.device(name, "vlan 10\nvlan 20"));

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-a", OrderType::Create)).await;

    assert_eq!(outcome.status, TransactionStatus::Completed);
    assert_eq!(outcome.devices.len(), 3);
    assert!(outcome.code.is_none());
    assert_eq!(aggregate(store.as_ref(), "tx-a").await, TransactionStatus::Completed);

    let rows = store.list_device_statuses("tx-a").await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.status == TransactionStatus::Completed));

    for (name, probe) in names.iter().zip(&probes) {
        assert_eq!(probe.connects(), 1);
        assert_eq!(probe.disconnects(), 1);
        assert_eq!(probe.running(), vec!["vlan 10", "vlan 20"]);
        let record = store.read_device_record("tx-a", name).await.unwrap().unwrap();
        assert_eq!(record.order_type, OrderType::Create);
        assert!(record.finished_at >= record.started_at);
    }
}

/// Scenario B: device 2 fails validation, device 1 is unaffected.
#[tokio::test]
async fn test_scenario_b_validation_failure_is_isolated() {
    let (store, factory) = setup();
    let first = factory.device("leaf-01", MockBehavior::new());
    let second = factory.device("leaf-02", MockBehavior::new().validation_fails());
    let payload = PayloadBuilder::new()
        .device("leaf-01", "vlan 10")
        .device("leaf-02", "vlan 10");

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-b", OrderType::Create)).await;

    assert_eq!(device_status(store.as_ref(), "tx-b", "leaf-01").await, TransactionStatus::Completed);
    assert_eq!(
        device_status(store.as_ref(), "tx-b", "leaf-02").await,
        TransactionStatus::FailedValidation
    );
    assert_eq!(outcome.status, TransactionStatus::FailedValidation);
    assert_eq!(aggregate(store.as_ref(), "tx-b").await, TransactionStatus::FailedValidation);

    let failed = outcome.device("leaf-02").unwrap();
    assert_eq!(failed.code.as_deref(), Some("EMCP-3001"));
    assert!(failed.reason.as_deref().unwrap().contains("invalid-value"));
    assert_eq!(outcome.failed_devices().count(), 1);

    assert_eq!(first.running(), vec!["vlan 10"]);
    assert!(second.running().is_empty());
    assert_eq!(second.disconnects(), 1);
    assert_eq!(second.commits(), 0);
}

/// Scenario C: forced delete keeps going past an apply failure.
#[tokio::test]
async fn test_scenario_c_forced_delete_completes() {
    let (store, factory) = setup();
    let probe = factory.device("cpe-01", MockBehavior::new().remove_fails());
    let payload = PayloadBuilder::new().device("cpe-01", "vlan 10").force();

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-c", OrderType::Delete)).await;

    assert_eq!(outcome.status, TransactionStatus::Completed);
    let device = outcome.device("cpe-01").unwrap();
    assert_eq!(device.status, TransactionStatus::Completed);
    assert_eq!(device.warnings.len(), 1);
    assert!(device.warnings[0].starts_with("FAILED_APPLY ignored"));
    assert_eq!(probe.removes(), 1);
    assert_eq!(probe.disconnects(), 1);

    let record = store.read_device_record("tx-c", "cpe-01").await.unwrap().unwrap();
    assert_eq!(record.warnings, device.warnings);
}

#[tokio::test]
async fn test_unforced_delete_failure_stops_at_failed_apply() {
    let (store, factory) = setup();
    let probe = factory.device("cpe-01", MockBehavior::new().remove_fails());
    let payload = PayloadBuilder::new().device("cpe-01", "vlan 10");

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-c2", OrderType::Delete)).await;

    assert_eq!(outcome.status, TransactionStatus::FailedApply);
    assert_eq!(probe.disconnects(), 1);
}

#[tokio::test]
async fn test_delete_removes_lines_and_verifies_absence() {
    let (store, factory) = setup();
    let probe = factory.device("leaf-01", MockBehavior::new());
    probe.set_running(&["vlan 10", "vlan 20"]);
    let payload = PayloadBuilder::new().verified_device("leaf-01", "vlan 10");

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-d", OrderType::Delete)).await;

    assert_eq!(outcome.status, TransactionStatus::Completed);
    assert_eq!(probe.running(), vec!["vlan 20"]);
    let record = store.read_device_record("tx-d", "leaf-01").await.unwrap().unwrap();
    assert_eq!(record.diff.removed, vec!["vlan 10"]);
    assert!(record.diff.added.is_empty());
}

#[tokio::test]
async fn test_n_devices_start_n_workflows() {
    let (store, factory) = setup();
    let names = device_names("edge", 12);
    let probes: Vec<_> = names
        .iter()
        .map(|name| factory.device(name, MockBehavior::new()))
        .collect();
    let payload = names
        .iter()
        .fold(PayloadBuilder::new(), |builder, name| builder.device(name, "ntp server 192.0.2.1"));

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-n", OrderType::Modify)).await;

    assert_eq!(outcome.devices.len(), names.len());
    assert!(outcome.devices.iter().all(|d| d.status.is_terminal()));
    assert_eq!(probes.iter().map(|p| p.starts()).sum::<u32>(), 12);
    let listed: Vec<_> = outcome.devices.iter().map(|d| d.device.clone()).collect();
    assert_eq!(listed, names);
}

#[tokio::test]
async fn test_failures_before_connect_never_disconnect() {
    let (store, factory) = setup();
    let cases = [
        ("dev-noresp", MockBehavior::new().no_response(), TransactionStatus::FailedOther),
        ("dev-reject", MockBehavior::new().rejected(), TransactionStatus::FailedOther),
        ("dev-caps", MockBehavior::new().inconsistent(), TransactionStatus::FailedConsistency),
        ("dev-start", MockBehavior::new().start_fails(), TransactionStatus::FailedOther),
    ];
    let mut payload = PayloadBuilder::new();
    for (name, behavior, _) in &cases {
        factory.device(name, behavior.clone());
        payload = payload.device(name, "vlan 10");
    }
    payload = payload.device("dev-missing", "vlan 10");

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-pre", OrderType::Create)).await;

    for (name, _, expected) in &cases {
        assert_eq!(outcome.device(name).unwrap().status, *expected, "{}", name);
        let probe = factory.probe(name).unwrap();
        assert_eq!(probe.disconnects(), 0, "{}", name);
        assert_eq!(probe.reserves(), 0, "{}", name);
    }
    assert_eq!(factory.probe("dev-start").unwrap().connects(), 0);
    assert_eq!(
        outcome.device("dev-missing").unwrap().status,
        TransactionStatus::FailedConsistency
    );
}

#[tokio::test]
async fn test_failures_after_connect_disconnect_exactly_once() {
    let (store, factory) = setup();
    let cases = [
        ("dev-prefetch", MockBehavior::new().fetch_fails_from(1), TransactionStatus::FailedPreFetch),
        ("dev-postfetch", MockBehavior::new().fetch_fails_from(2), TransactionStatus::FailedPostFetch),
        ("dev-dropped", MockBehavior::new().drops_changes(), TransactionStatus::FailedPostFetch),
        ("dev-apply", MockBehavior::new().apply_fails(), TransactionStatus::FailedApply),
        ("dev-commit", MockBehavior::new().commit_fails(), TransactionStatus::FailedApply),
    ];
    let mut payload = PayloadBuilder::new();
    for (name, behavior, _) in &cases {
        factory.device(name, behavior.clone());
        payload = payload.verified_device(name, "vlan 10");
    }

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-post", OrderType::Create)).await;

    for (name, _, expected) in &cases {
        assert_eq!(outcome.device(name).unwrap().status, *expected, "{}", name);
        let probe = factory.probe(name).unwrap();
        assert_eq!(probe.connects(), 1, "{}", name);
        assert_eq!(probe.disconnects(), 1, "{}", name);
        assert_eq!(probe.unpaired_disconnects(), 0, "{}", name);
        assert_eq!(device_status(store.as_ref(), "tx-post", name).await, *expected);
    }
    assert!(outcome
        .device("dev-dropped")
        .unwrap()
        .reason
        .as_deref()
        .unwrap()
        .contains("missing after change"));
}

#[tokio::test]
async fn test_store_failure_at_start_skips_device_contact() {
    let store = Arc::new(FailingStore::new().fail_device_inserts());
    let factory = Arc::new(MockDriverFactory::new());
    let probe = factory.device("leaf-01", MockBehavior::new());

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-s1", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::FailedTransient);
    assert_eq!(probe.starts(), 0);
    assert_eq!(probe.connects(), 0);
    assert!(store.inner().read_device_status("tx-s1", "leaf-01").await.unwrap().is_none());
}

#[tokio::test]
async fn test_store_failure_at_completion_is_transient() {
    let store = Arc::new(FailingStore::new().fail_device_status(TransactionStatus::Completed));
    let factory = Arc::new(MockDriverFactory::new());
    let probe = factory.device("leaf-01", MockBehavior::new());

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-s2", OrderType::Create))
        .await;

    assert_eq!(outcome.device("leaf-01").unwrap().status, TransactionStatus::FailedTransient);
    assert_eq!(probe.disconnects(), 1);
    // The failure path writes nothing once the store has failed.
    assert_eq!(device_status(store.as_ref(), "tx-s2", "leaf-01").await, TransactionStatus::Committed);
    assert_eq!(aggregate(store.as_ref(), "tx-s2").await, TransactionStatus::FailedTransient);
}

#[tokio::test]
async fn test_record_write_failure_is_only_a_warning() {
    let store = Arc::new(FailingStore::new().fail_records());
    let factory = Arc::new(MockDriverFactory::new());
    factory.device("leaf-01", MockBehavior::new());

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-s3", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_bad_device_section_fails_only_that_device() {
    let (store, factory) = setup();
    let good = factory.device("leaf-01", MockBehavior::new());
    let bad = factory.device("leaf-02", MockBehavior::new());
    let payload = PayloadBuilder::new()
        .device("leaf-01", "vlan 10")
        .device_section("leaf-02", serde_json::json!({"text": 42}));

    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let outcome = dispatch_loop.process(payload.request("tx-t", OrderType::Create)).await;

    assert_eq!(outcome.device("leaf-01").unwrap().status, TransactionStatus::Completed);
    assert_eq!(outcome.device("leaf-02").unwrap().status, TransactionStatus::FailedBadRequest);
    assert_eq!(good.connects(), 1);
    assert_eq!(bad.starts(), 0);
}

#[tokio::test]
async fn test_terminal_aggregate_is_never_overwritten() {
    let (store, factory) = setup();
    factory.device("leaf-01", MockBehavior::new().apply_fails());
    factory.device("leaf-02", MockBehavior::new().commit_fails());
    factory.device("leaf-03", MockBehavior::new());
    let payload = PayloadBuilder::new()
        .device("leaf-01", "vlan 10")
        .device("leaf-02", "vlan 10")
        .device("leaf-03", "vlan 10");
    let request = payload.request("tx-m", OrderType::Create);

    let ctx = context(store.clone(), factory.clone(), 10);
    let (_dispatcher, dispatch_loop) = Dispatcher::new(ctx.clone(), "raw");
    let outcome = dispatch_loop.process(request.clone()).await;

    assert_eq!(outcome.status, TransactionStatus::FailedApply);
    let settled = aggregate(store.as_ref(), "tx-m").await;
    assert_eq!(settled, TransactionStatus::FailedApply);

    // A late report must not move a terminal aggregate.
    ctx.subnormal
        .report_failure(&request, "leaf-03", TransactionStatus::RollbackFailed, "late", None, false)
        .await;
    assert_eq!(aggregate(store.as_ref(), "tx-m").await, settled);
}

#[tokio::test]
async fn test_read_audits_against_latest_snapshot() {
    let (store, factory) = setup();
    let probe = factory.device("leaf-01", MockBehavior::new());
    factory.device("leaf-02", MockBehavior::new());
    let ctx = context(store.clone(), factory.clone(), 10);
    let (_dispatcher, dispatch_loop) = Dispatcher::new(ctx, "raw");

    let created = dispatch_loop
        .process(
            PayloadBuilder::new()
                .verified_device("leaf-01", "vlan 10")
                .request("tx-r1", OrderType::Create),
        )
        .await;
    assert_eq!(created.status, TransactionStatus::Completed);
    let snapshot = store.latest_snapshot("leaf-01").await.unwrap().unwrap();
    assert_eq!(snapshot.transaction_id, "tx-r1");

    let audit = PayloadBuilder::new().bare_device("leaf-01");
    let clean = dispatch_loop.process(audit.request("tx-r2", OrderType::Read)).await;
    assert_eq!(clean.status, TransactionStatus::Completed);

    probe.set_running(&["vlan 10", "vlan 99"]);
    let drifted = dispatch_loop.process(audit.request("tx-r3", OrderType::Read)).await;
    assert_eq!(drifted.status, TransactionStatus::FailedConsistency);
    assert!(drifted.devices[0].reason.as_deref().unwrap().contains("1 line(s) added"));
    assert_eq!(probe.disconnects(), 3);

    let never_seen = dispatch_loop
        .process(PayloadBuilder::new().bare_device("leaf-02").request("tx-r4", OrderType::Read))
        .await;
    assert_eq!(never_seen.status, TransactionStatus::FailedNoData);
}

#[tokio::test]
async fn test_read_fetch_failure_is_failed_other() {
    let (store, factory) = setup();
    factory.device("leaf-01", MockBehavior::new().fetch_fails_from(1));
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");

    let outcome = dispatch_loop
        .process(PayloadBuilder::new().bare_device("leaf-01").request("tx-r5", OrderType::Read))
        .await;
    assert_eq!(outcome.status, TransactionStatus::FailedOther);
    assert_eq!(factory.probe("leaf-01").unwrap().disconnects(), 1);
}

#[tokio::test]
async fn test_disconnect_failure_keeps_completed_status() {
    let (store, factory) = setup();
    let probe = factory.device("leaf-01", MockBehavior::new().disconnect_fails());
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");

    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-dc1", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::Completed);
    assert_eq!(device_status(store.as_ref(), "tx-dc1", "leaf-01").await, TransactionStatus::Completed);
    assert_eq!(aggregate(store.as_ref(), "tx-dc1").await, TransactionStatus::Completed);
    assert_eq!(probe.disconnects(), 1);
    assert_eq!(probe.running(), vec!["vlan 10"]);
}

#[tokio::test]
async fn test_disconnect_failure_after_apply_failure_is_not_escalated() {
    let (store, factory) = setup();
    let probe = factory.device("leaf-01", MockBehavior::new().apply_fails().disconnect_fails());
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");

    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-dc2", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::FailedApply);
    assert_eq!(device_status(store.as_ref(), "tx-dc2", "leaf-01").await, TransactionStatus::FailedApply);
    assert_eq!(aggregate(store.as_ref(), "tx-dc2").await, TransactionStatus::FailedApply);
    assert_eq!(probe.disconnects(), 1);
}

#[tokio::test]
async fn test_concluded_transaction_id_is_not_run_again() {
    let (store, factory) = setup();
    let probe = factory.device("leaf-01", MockBehavior::new().apply_fails());
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");
    let payload = PayloadBuilder::new().device("leaf-01", "vlan 10");

    let first = dispatch_loop.process(payload.request("tx-1", OrderType::Create)).await;
    assert_eq!(first.status, TransactionStatus::FailedApply);

    // Same id again, now against a healthy device.
    factory.device("leaf-01", MockBehavior::new());
    let replay = dispatch_loop.process(payload.request("tx-1", OrderType::Create)).await;

    assert_eq!(replay.status, TransactionStatus::FailedApply);
    assert!(replay.devices.is_empty());
    assert!(replay.reason.as_deref().unwrap().contains("already concluded"));
    assert_eq!(probe.connects(), 1);
    assert!(probe.running().is_empty());
    assert_eq!(aggregate(store.as_ref(), "tx-1").await, TransactionStatus::FailedApply);
    assert_eq!(device_status(store.as_ref(), "tx-1", "leaf-01").await, TransactionStatus::FailedApply);
}

#[tokio::test]
async fn test_unreadable_transaction_record_refuses_request() {
    let store = Arc::new(FailingStore::new().fail_transaction_reads());
    let factory = Arc::new(MockDriverFactory::new());
    let probe = factory.device("leaf-01", MockBehavior::new());
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory.clone(), 10), "raw");

    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-rd", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::FailedTransient);
    assert_eq!(probe.starts(), 0);
    assert!(store.inner().read_transaction("tx-rd").await.unwrap().is_none());
}
