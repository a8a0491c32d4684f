//! Device workflow: the per-device provisioning state machine.
//!
//! One workflow runs per (request, device). A create, modify or delete goes
//! through:
//!
//! 1. mark `RUNNING`
//! 2. translate the device section
//! 3. build and start the device driver
//! 4. connect
//! 5. optional pre-change fetch
//! 6. apply (stage, commit, optional confirmation window)
//! 7. optional post-change fetch and verification
//! 8. disconnect
//! 9. persist the device record
//! 10. mark `COMPLETED`
//!
//! A read replaces steps 5 to 7 with one fetch compared against the latest
//! persisted snapshot. Any failing step hands over to the
//! [`SubnormalHandler`](crate::subnormal::SubnormalHandler).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use emcp_common::audit::{AuditCategory, AuditOutcome, AuditRecord};
use emcp_common::{
    audit_log, ChangeRequest, DeviceSubRequest, OrderType, RequestFlags, TransactionStatus,
};
use emcp_driver::{ApplyOutcome, CommitOutcome, ConnectOutcome, DriverError};
use emcp_store::{ConfigDiff, ConfigSnapshot, DeviceRecord, SnapshotKind, WriteOp};

use crate::adapter::{ApplyVerb, DeviceParams, ServiceAdapter};
use crate::context::AppContext;
use crate::session::DeviceSession;
use crate::wait::WaitRegistry;

/// What one device workflow ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DeviceOutcome {
    pub fn completed(device: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            device: device.into(),
            status: TransactionStatus::Completed,
            code: None,
            reason: None,
            warnings,
        }
    }

    pub fn failed(
        device: impl Into<String>,
        status: TransactionStatus,
        reason: impl Into<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            device: device.into(),
            status,
            code: status.error_code().map(str::to_string),
            reason: Some(reason.into()),
            warnings,
        }
    }
}

/// The workflow's own view of its device status.
///
/// Refuses any move out of a terminal status.
#[derive(Debug, Clone, Copy)]
pub struct StatusCell {
    current: TransactionStatus,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self {
            current: TransactionStatus::Running,
        }
    }
}

impl StatusCell {
    pub fn get(&self) -> TransactionStatus {
        self.current
    }

    /// Returns false, leaving the cell untouched, if the move is refused.
    pub fn set(&mut self, next: TransactionStatus) -> bool {
        if !self.current.can_transition_to(next) {
            warn!(current = %self.current, refused = %next, "Refusing to leave a terminal status");
            return false;
        }
        self.current = next;
        true
    }
}

/// Why a step stopped the workflow.
#[derive(Debug)]
struct StepFailure {
    status: TransactionStatus,
    reason: String,
    store_failed: bool,
}

impl StepFailure {
    fn new(status: TransactionStatus, reason: impl fmt::Display) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            store_failed: false,
        }
    }

    fn store(reason: impl fmt::Display) -> Self {
        Self {
            status: TransactionStatus::FailedTransient,
            reason: format!("transaction store: {}", reason),
            store_failed: true,
        }
    }
}

type StepResult<T> = Result<T, StepFailure>;

fn apply_failure_status(err: &DriverError) -> TransactionStatus {
    if err.is_validation() {
        TransactionStatus::FailedValidation
    } else {
        TransactionStatus::FailedApply
    }
}

/// Lines of `intended` whose presence in `config` is not `expect_present`.
pub fn unexpected_lines<'a>(
    config: &str,
    intended: &'a [String],
    expect_present: bool,
) -> Vec<&'a str> {
    let present: HashSet<&str> = config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    intended
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && present.contains(line) != expect_present)
        .collect()
}

pub struct DeviceWorkflow {
    ctx: Arc<AppContext>,
    adapter: Arc<dyn ServiceAdapter>,
    request: Arc<ChangeRequest>,
    sub_request: DeviceSubRequest,
    flags: RequestFlags,
    waits: WaitRegistry,
    status: StatusCell,
    warnings: Vec<String>,
    pre_snapshot: Option<String>,
    post_snapshot: Option<String>,
    started_at: DateTime<Utc>,
}

impl DeviceWorkflow {
    pub fn new(
        ctx: Arc<AppContext>,
        adapter: Arc<dyn ServiceAdapter>,
        request: Arc<ChangeRequest>,
        sub_request: DeviceSubRequest,
        flags: RequestFlags,
        waits: WaitRegistry,
    ) -> Self {
        Self {
            ctx,
            adapter,
            request,
            sub_request,
            flags,
            waits,
            status: StatusCell::default(),
            warnings: Vec::new(),
            pre_snapshot: None,
            post_snapshot: None,
            started_at: Utc::now(),
        }
    }

    pub fn device(&self) -> &str {
        &self.sub_request.device
    }

    pub fn status(&self) -> TransactionStatus {
        self.status.get()
    }

    /// Runs the workflow to a terminal status.
    #[instrument(
        skip(self),
        fields(
            transaction_id = %self.sub_request.transaction_id,
            device = %self.sub_request.device,
            order_type = %self.sub_request.order_type
        )
    )]
    pub async fn run(mut self) -> DeviceOutcome {
        let mut session = None;
        let result = match self.sub_request.order_type {
            OrderType::Read => self.run_read(&mut session).await,
            _ => self.run_change(&mut session).await,
        };

        match result {
            Ok(()) => {
                info!(status = %TransactionStatus::Completed, "Device workflow completed");
                DeviceOutcome::completed(self.sub_request.device.clone(), self.warnings)
            }
            Err(failure) => {
                self.status.set(failure.status);
                self.ctx
                    .subnormal
                    .report_failure(
                        &self.request,
                        &self.sub_request.device,
                        failure.status,
                        &failure.reason,
                        session.as_mut(),
                        failure.store_failed,
                    )
                    .await;
                DeviceOutcome::failed(
                    self.sub_request.device.clone(),
                    failure.status,
                    failure.reason,
                    self.warnings,
                )
            }
        }
    }

    async fn run_change(&mut self, slot: &mut Option<DeviceSession>) -> StepResult<()> {
        self.begin().await?;
        let params = self.translate()?;
        let session = slot.insert(self.open_session().await?);
        self.connect(session).await?;

        if params.pre_fetch {
            let config = self
                .fetch_and_persist(session, SnapshotKind::PreChange)
                .await
                .map_err(|reason| {
                    StepFailure::new(TransactionStatus::FailedPreFetch, format!("pre-change {}", reason))
                })?;
            self.pre_snapshot = Some(config);
        }

        let verb = self.adapter.apply_verb(self.sub_request.order_type);
        let forced = match verb {
            ApplyVerb::Apply => self.apply(session, &params).await?,
            ApplyVerb::Remove => self.remove(session, &params).await?,
        };

        if params.post_fetch && !forced {
            self.verify(session, &params, verb).await?;
        }

        self.finish(session).await
    }

    async fn run_read(&mut self, slot: &mut Option<DeviceSession>) -> StepResult<()> {
        self.begin().await?;
        self.translate()?;
        let session = slot.insert(self.open_session().await?);
        self.connect(session).await?;

        let fetched = session.driver_mut().fetch_config().await.map_err(|e| {
            StepFailure::new(TransactionStatus::FailedOther, format!("fetch failed: {}", e))
        })?;
        let baseline = self
            .ctx
            .store
            .latest_snapshot(&self.sub_request.device)
            .await
            .map_err(StepFailure::store)?
            .ok_or_else(|| {
                StepFailure::new(TransactionStatus::FailedNoData, "no configuration snapshot on record")
            })?;

        let diff = ConfigDiff::between(&baseline.config, &fetched);
        self.pre_snapshot = Some(baseline.config);
        self.post_snapshot = Some(fetched);
        if !diff.is_empty() {
            return Err(StepFailure::new(
                TransactionStatus::FailedConsistency,
                format!(
                    "configuration drifted since transaction {}: {} line(s) added, {} removed",
                    baseline.transaction_id,
                    diff.added.len(),
                    diff.removed.len()
                ),
            ));
        }
        debug!(baseline = %baseline.transaction_id, "Configuration matches snapshot");

        self.finish(session).await
    }

    /// Step 1.
    async fn begin(&mut self) -> StepResult<()> {
        self.write_status(WriteOp::Insert, TransactionStatus::Running)
            .await
            .map_err(StepFailure::store)
    }

    /// Step 2.
    fn translate(&self) -> StepResult<DeviceParams> {
        self.adapter
            .translate(&self.sub_request)
            .map_err(|e| StepFailure::new(TransactionStatus::FailedBadRequest, e))
    }

    /// Step 3.
    async fn open_session(&self) -> StepResult<DeviceSession> {
        let device = &self.sub_request.device;
        let mut driver = self.ctx.drivers.create(device).ok_or_else(|| {
            StepFailure::new(
                TransactionStatus::FailedConsistency,
                format!("device '{}' is not in the inventory", device),
            )
        })?;
        driver.start().await.map_err(|e| {
            StepFailure::new(TransactionStatus::FailedOther, format!("driver start failed: {}", e))
        })?;
        Ok(DeviceSession::new(driver))
    }

    /// Step 4.
    async fn connect(&self, session: &mut DeviceSession) -> StepResult<()> {
        match session.connect().await {
            ConnectOutcome::Ok => {
                audit_log!(AuditRecord::new(AuditCategory::DeviceSession, "workflow", "connect")
                    .with_transaction(&self.sub_request.transaction_id)
                    .with_device(&self.sub_request.device)
                    .with_outcome(AuditOutcome::Success));
                Ok(())
            }
            ConnectOutcome::NoResponse(reason) => Err(StepFailure::new(
                TransactionStatus::FailedOther,
                format!("no response: {}", reason),
            )),
            ConnectOutcome::Rejected(reason) => Err(StepFailure::new(
                TransactionStatus::FailedOther,
                format!("rejected: {}", reason),
            )),
            ConnectOutcome::Inconsistent(reason) => {
                Err(StepFailure::new(TransactionStatus::FailedConsistency, reason))
            }
        }
    }

    async fn fetch_and_persist(
        &self,
        session: &mut DeviceSession,
        kind: SnapshotKind,
    ) -> Result<String, String> {
        let config = session
            .driver_mut()
            .fetch_config()
            .await
            .map_err(|e| format!("fetch failed: {}", e))?;
        let snapshot = ConfigSnapshot::new(
            self.sub_request.device.clone(),
            self.sub_request.transaction_id.clone(),
            kind,
            config,
        );
        self.ctx
            .store
            .save_snapshot(&snapshot)
            .await
            .map_err(|e| format!("snapshot not persisted: {}", e))?;
        Ok(snapshot.config)
    }

    /// Step 6 for [`ApplyVerb::Apply`]. Returns true if a failure was
    /// forced through.
    async fn apply(&mut self, session: &mut DeviceSession, params: &DeviceParams) -> StepResult<bool> {
        if let Err(e) = session.driver_mut().reserve(&params.blob).await {
            return self.apply_failure(apply_failure_status(&e), format!("staging failed: {}", e));
        }
        self.progress(TransactionStatus::ConfigStaged).await;

        match session.driver_mut().commit().await {
            Err(e) => self.apply_failure(apply_failure_status(&e), format!("commit failed: {}", e)),
            Ok(CommitOutcome::Committed) => {
                self.committed().await;
                Ok(false)
            }
            Ok(CommitOutcome::AwaitingConfirmation(window)) => {
                self.await_confirmation(session, window).await?;
                Ok(false)
            }
        }
    }

    /// Step 6 for [`ApplyVerb::Remove`].
    async fn remove(&mut self, session: &mut DeviceSession, params: &DeviceParams) -> StepResult<bool> {
        match session.driver_mut().remove_config(&params.blob).await {
            ApplyOutcome::Ok => {
                self.committed().await;
                Ok(false)
            }
            ApplyOutcome::ValidationFailed(reason) => {
                self.apply_failure(TransactionStatus::FailedValidation, reason)
            }
            ApplyOutcome::ApplyFailed(reason) => {
                self.apply_failure(TransactionStatus::FailedApply, reason)
            }
        }
    }

    /// A forced delete turns apply failures into warnings.
    fn apply_failure(&mut self, status: TransactionStatus, reason: String) -> StepResult<bool> {
        if self.sub_request.order_type == OrderType::Delete && self.flags.force {
            warn!(%status, reason = %reason, "Ignoring apply failure on forced delete");
            self.warnings.push(format!("{} ignored (force): {}", status, reason));
            return Ok(true);
        }
        Err(StepFailure::new(status, reason))
    }

    async fn committed(&mut self) {
        self.progress(TransactionStatus::Committed).await;
        audit_log!(AuditRecord::new(
            AuditCategory::ConfigurationChange,
            "workflow",
            self.sub_request.order_type.as_str(),
        )
        .with_transaction(&self.sub_request.transaction_id)
        .with_device(&self.sub_request.device)
        .with_outcome(AuditOutcome::Success));
    }

    /// Holds a confirmed commit until a signal arrives or `window` elapses,
    /// counted from the commit's return.
    async fn await_confirmation(
        &mut self,
        session: &mut DeviceSession,
        window: Duration,
    ) -> StepResult<()> {
        let deadline = Instant::now() + window;
        let handle = self
            .waits
            .register(&self.sub_request.transaction_id, &self.sub_request.device);
        self.progress(TransactionStatus::CommitPending).await;
        info!(window_secs = window.as_secs(), "Awaiting confirmation");

        let confirmed = handle.wait_until(deadline).await;
        drop(handle);

        if confirmed {
            session.driver_mut().confirm().await.map_err(|e| {
                StepFailure::new(TransactionStatus::FailedApply, format!("confirm failed: {}", e))
            })?;
            self.committed().await;
            return Ok(());
        }

        info!(window_secs = window.as_secs(), "Confirmation window expired, rolling back");
        self.progress(TransactionStatus::RollingBack).await;
        let record = AuditRecord::new(AuditCategory::Rollback, "workflow", "rollback")
            .with_transaction(&self.sub_request.transaction_id)
            .with_device(&self.sub_request.device);

        match session.driver_mut().rollback().await {
            Ok(()) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Err(StepFailure::new(
                    TransactionStatus::RolledBack,
                    format!("not confirmed within {}s, changes rolled back", window.as_secs()),
                ))
            }
            Err(e) => {
                audit_log!(record.with_error(e.to_string()));
                Err(StepFailure::new(
                    TransactionStatus::RollbackFailed,
                    format!("not confirmed within {}s and rollback failed: {}", window.as_secs(), e),
                ))
            }
        }
    }

    /// Step 7.
    async fn verify(
        &mut self,
        session: &mut DeviceSession,
        params: &DeviceParams,
        verb: ApplyVerb,
    ) -> StepResult<()> {
        let config = self
            .fetch_and_persist(session, SnapshotKind::PostChange)
            .await
            .map_err(|reason| {
                StepFailure::new(TransactionStatus::FailedPostFetch, format!("post-change {}", reason))
            })?;

        let expect_present = verb == ApplyVerb::Apply;
        let wrong = unexpected_lines(&config, &params.intended, expect_present);
        let result = match wrong.first() {
            None => Ok(()),
            Some(first) => Err(StepFailure::new(
                TransactionStatus::FailedPostFetch,
                format!(
                    "{} line(s) {} after change, first: '{}'",
                    wrong.len(),
                    if expect_present { "missing" } else { "still present" },
                    first
                ),
            )),
        };
        self.post_snapshot = Some(config);
        result
    }

    /// Steps 8 to 10.
    async fn finish(&mut self, session: &mut DeviceSession) -> StepResult<()> {
        if let Err(e) = session.close().await {
            warn!(error = %e, "Disconnect failed");
        }

        let diff = match (&self.pre_snapshot, &self.post_snapshot) {
            (Some(before), Some(after)) => ConfigDiff::between(before, after),
            _ => ConfigDiff::default(),
        };
        let record = DeviceRecord {
            transaction_id: self.sub_request.transaction_id.clone(),
            device: self.sub_request.device.clone(),
            order_type: self.sub_request.order_type,
            pre_snapshot: self.pre_snapshot.clone(),
            post_snapshot: self.post_snapshot.clone(),
            diff,
            warnings: self.warnings.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.ctx.store.write_device_record(&record).await {
            warn!(error = %e, "Device record not persisted");
        }

        self.write_status(WriteOp::Update, TransactionStatus::Completed)
            .await
            .map_err(StepFailure::store)
    }

    /// Writes the status to the store, then to the cell.
    async fn write_status(
        &mut self,
        op: WriteOp,
        status: TransactionStatus,
    ) -> emcp_store::StoreResult<()> {
        self.ctx
            .store
            .write_device_status(
                op,
                &self.sub_request.device,
                &self.sub_request.transaction_id,
                self.sub_request.order_type,
                status,
            )
            .await?;
        self.status.set(status);
        debug!(%status, "Device status recorded");
        Ok(())
    }

    /// Records an in-progress status; a store failure here is only a warning.
    async fn progress(&mut self, status: TransactionStatus) {
        if let Err(e) = self.write_status(WriteOp::Update, status).await {
            warn!(%status, error = %e, "Progress status not persisted");
            self.status.set(status);
            self.warnings
                .push(format!("{} not persisted: {}", status, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_cell_refuses_terminal_exit() {
        let mut cell = StatusCell::default();
        assert!(cell.set(TransactionStatus::ConfigStaged));
        assert!(cell.set(TransactionStatus::FailedApply));
        assert!(!cell.set(TransactionStatus::Committed));
        assert!(!cell.set(TransactionStatus::Completed));
        assert_eq!(cell.get(), TransactionStatus::FailedApply);
    }

    #[test]
    fn test_unexpected_lines() {
        let running = "vlan 10\n  description uplink\nvlan 30\n";
        let intended = vec!["vlan 10".to_string(), "description uplink".to_string(), "vlan 20".to_string()];
        assert_eq!(unexpected_lines(running, &intended, true), vec!["vlan 20"]);
        assert_eq!(
            unexpected_lines(running, &intended, false),
            vec!["vlan 10", "description uplink"]
        );
        assert!(unexpected_lines(running, &[], true).is_empty());
    }

    #[test]
    fn test_failed_outcome_carries_code() {
        let outcome = DeviceOutcome::failed("a", TransactionStatus::RolledBack, "expired", vec![]);
        assert_eq!(outcome.code.as_deref(), Some("EMCP-2001"));
        assert!(DeviceOutcome::completed("a", vec![]).code.is_none());
    }
}
