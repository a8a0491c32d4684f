//! Confirmed commit windows under a paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use emcp_common::{OrderType, TransactionStatus};
use emcp_provisiond::{AppContext, ChannelComposer, Dispatcher};
use emcp_store::{MemoryStore, TransactionStore};
use emcp_test::{context, device_names, MockBehavior, MockDriverFactory, PayloadBuilder};
use pretty_assertions::assert_eq;

const WINDOW: Duration = Duration::from_secs(120);

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_commit_rolls_back_when_window_expires() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    let probe = factory.device("leaf-01", MockBehavior::new().confirmed(WINDOW));
    probe.set_running(&["hostname leaf-01"]);
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store.clone(), factory, 10), "raw");

    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-1", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert_eq!(outcome.code.as_deref(), Some("EMCP-2001"));
    let committed = probe.committed_at().unwrap();
    let rolled_back = probe.rolled_back_at().unwrap();
    let waited = rolled_back - committed;
    assert!(waited >= WINDOW, "rolled back after {:?}", waited);
    assert!(waited <= WINDOW + Duration::from_secs(1), "rolled back after {:?}", waited);

    assert_eq!(probe.rollbacks(), 1);
    assert_eq!(probe.confirms(), 0);
    assert_eq!(probe.running(), vec!["hostname leaf-01"]);
    assert_eq!(probe.disconnects(), 1);
    let row = store.read_device_status("tx-1", "leaf-01").await.unwrap().unwrap();
    assert_eq!(row.status, TransactionStatus::RolledBack);
}

#[tokio::test(start_paused = true)]
async fn test_notify_confirms_pending_commit() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    let probe = factory.device("leaf-01", MockBehavior::new().confirmed(WINDOW));
    let (composer, mut outcomes) = ChannelComposer::new();
    let ctx = Arc::new(AppContext::new(store.clone(), factory).with_composer(Arc::new(composer)));
    let dispatcher = Dispatcher::spawn(ctx, "raw");

    assert!(dispatcher.submit(
        "tx-2",
        OrderType::Create,
        PayloadBuilder::new().device("leaf-01", "vlan 10").build()
    ));
    eventually(|| dispatcher.pending_confirmations() == 1).await;
    let row = store.read_device_status("tx-2", "leaf-01").await.unwrap().unwrap();
    assert_eq!(row.status, TransactionStatus::CommitPending);

    assert_eq!(dispatcher.notify("tx-2", OrderType::Create, "{}"), 1);
    let outcome = outcomes.recv().await.unwrap();

    assert_eq!(outcome.status, TransactionStatus::Completed);
    assert_eq!(probe.confirms(), 1);
    assert_eq!(probe.rollbacks(), 0);
    assert_eq!(probe.running(), vec!["vlan 10"]);
    assert_eq!(dispatcher.pending_confirmations(), 0);
    dispatcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_notify_naming_devices_wakes_only_those() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    let first = factory.device("leaf-01", MockBehavior::new().confirmed(WINDOW));
    let second = factory.device("leaf-02", MockBehavior::new().confirmed(WINDOW));
    let (composer, mut outcomes) = ChannelComposer::new();
    let ctx = Arc::new(AppContext::new(store, factory).with_composer(Arc::new(composer)));
    let dispatcher = Dispatcher::spawn(ctx, "raw");

    let payload = PayloadBuilder::new()
        .device("leaf-01", "vlan 10")
        .device("leaf-02", "vlan 10")
        .build();
    assert!(dispatcher.submit("tx-3", OrderType::Create, payload));
    eventually(|| dispatcher.pending_confirmations() == 2).await;

    assert_eq!(
        dispatcher.notify("tx-3", OrderType::Create, r#"{"devices": ["leaf-01"]}"#),
        1
    );
    let outcome = outcomes.recv().await.unwrap();

    assert_eq!(outcome.device("leaf-01").unwrap().status, TransactionStatus::Completed);
    assert_eq!(outcome.device("leaf-02").unwrap().status, TransactionStatus::RolledBack);
    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert_eq!(first.confirms(), 1);
    assert_eq!(second.rollbacks(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_rollback_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    let probe = factory.device("leaf-01", MockBehavior::new().confirmed(WINDOW).rollback_fails());
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store, factory, 10), "raw");

    let outcome = dispatch_loop
        .process(PayloadBuilder::new().device("leaf-01", "vlan 10").request("tx-4", OrderType::Create))
        .await;

    assert_eq!(outcome.status, TransactionStatus::RollbackFailed);
    assert_eq!(outcome.code.as_deref(), Some("EMCP-2002"));
    assert_eq!(probe.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_confirm_is_an_apply_failure() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    factory.device("leaf-01", MockBehavior::new().confirmed(WINDOW).confirm_fails());
    let (composer, mut outcomes) = ChannelComposer::new();
    let ctx = Arc::new(AppContext::new(store, factory).with_composer(Arc::new(composer)));
    let dispatcher = Dispatcher::spawn(ctx, "raw");

    assert!(dispatcher.submit(
        "tx-5",
        OrderType::Modify,
        PayloadBuilder::new().device("leaf-01", "vlan 10").build()
    ));
    eventually(|| dispatcher.pending_confirmations() == 1).await;
    dispatcher.notify("tx-5", OrderType::Modify, "");

    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.status, TransactionStatus::FailedApply);
    assert!(outcome.devices[0].reason.as_deref().unwrap().starts_with("confirm failed"));
    dispatcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_windows_run_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    let names = device_names("edge", 12);
    let payload = names.iter().fold(PayloadBuilder::new(), |builder, name| {
        factory.device(name, MockBehavior::new().confirmed(WINDOW));
        builder.device(name, "vlan 10")
    });
    let (_dispatcher, dispatch_loop) = Dispatcher::new(context(store, factory, 10), "raw");

    let started = Instant::now();
    let outcome = dispatch_loop.process(payload.request("tx-6", OrderType::Create)).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.devices.len(), 12);
    assert!(outcome.devices.iter().all(|d| d.status == TransactionStatus::RolledBack));
    assert!(elapsed >= WINDOW);
    assert!(elapsed < WINDOW * 2, "windows ran one after another: {:?}", elapsed);
}

#[tokio::test]
async fn test_notify_without_waiters_signals_nothing() {
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(MockDriverFactory::new());
    let dispatcher = Dispatcher::spawn(context(store, factory, 10), "raw");

    assert_eq!(dispatcher.notify("tx-7", OrderType::Create, "{}"), 0);
    dispatcher.shutdown().await;
}
