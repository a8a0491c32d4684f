//! Scenario dispatchers.
//!
//! One dispatcher runs per service type. Requests enter through a bounded
//! queue and are processed strictly one at a time: every device workflow of
//! a request finishes before the next request is dequeued. Devices within a
//! request run concurrently, each on its own task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use emcp_common::audit::{AuditCategory, AuditOutcome, AuditRecord};
use emcp_common::request::DEVICES_KEY;
use emcp_common::{audit_log, ChangeRequest, OrderType, TransactionStatus};
use emcp_store::WriteOp;

use crate::composer::TransactionOutcome;
use crate::context::AppContext;
use crate::wait::WaitRegistry;
use crate::workflow::{DeviceOutcome, DeviceWorkflow};

/// Inbound side of one service type's dispatcher.
pub struct Dispatcher {
    service_type: String,
    sender: mpsc::Sender<ChangeRequest>,
    waits: WaitRegistry,
    task: Option<JoinHandle<()>>,
}

/// Processing side of a dispatcher, run by [`DispatchLoop::run`].
pub struct DispatchLoop {
    ctx: Arc<AppContext>,
    service_type: String,
    receiver: mpsc::Receiver<ChangeRequest>,
    waits: WaitRegistry,
}

impl Dispatcher {
    /// Creates a dispatcher and its loop without starting the loop.
    pub fn new(ctx: Arc<AppContext>, service_type: impl Into<String>) -> (Self, DispatchLoop) {
        let service_type = service_type.into();
        let (sender, receiver) = mpsc::channel(ctx.queue_depth.max(1));
        let waits = WaitRegistry::new();
        let dispatcher = Self {
            service_type: service_type.clone(),
            sender,
            waits: waits.clone(),
            task: None,
        };
        let dispatch_loop = DispatchLoop {
            ctx,
            service_type,
            receiver,
            waits,
        };
        (dispatcher, dispatch_loop)
    }

    /// Creates a dispatcher and spawns its loop.
    pub fn spawn(ctx: Arc<AppContext>, service_type: impl Into<String>) -> Self {
        let (mut dispatcher, dispatch_loop) = Self::new(ctx, service_type);
        dispatcher.task = Some(tokio::spawn(dispatch_loop.run()));
        dispatcher
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Queues a request. Returns false at once if the queue is full or the
    /// loop has stopped.
    pub fn submit(
        &self,
        transaction_id: impl Into<String>,
        order_type: OrderType,
        payload: impl Into<String>,
    ) -> bool {
        let request = ChangeRequest::new(
            self.service_type.clone(),
            transaction_id,
            order_type,
            payload,
        );
        let transaction_id = request.transaction_id.clone();
        match self.sender.try_send(request) {
            Ok(()) => {
                debug!(service_type = %self.service_type, %transaction_id, "Request queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(service_type = %self.service_type, %transaction_id, "Queue full, request refused");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(service_type = %self.service_type, %transaction_id, "Dispatcher stopped, request refused");
                false
            }
        }
    }

    /// Wakes workflows waiting for confirmation.
    ///
    /// A payload naming devices (`{"devices": [{"name": ..}]}` or
    /// `{"devices": ["leaf-01"]}`) wakes only those devices; anything else
    /// wakes every registered wait. Returns how many waits were signalled.
    pub fn notify(&self, transaction_id: &str, order_type: OrderType, payload: &str) -> usize {
        let devices = notify_targets(payload);
        let signalled = self.waits.signal(&devices);
        info!(
            service_type = %self.service_type,
            transaction_id,
            %order_type,
            signalled,
            "Confirmation signal"
        );
        signalled
    }

    /// Number of workflows currently waiting for confirmation.
    pub fn pending_confirmations(&self) -> usize {
        self.waits.len()
    }

    /// Closes the queue and waits for queued requests to finish.
    pub async fn shutdown(self) {
        let Self {
            service_type,
            sender,
            task,
            ..
        } = self;
        drop(sender);
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(%service_type, error = %e, "Dispatch loop ended abnormally");
            }
        }
        info!(%service_type, "Dispatcher stopped");
    }
}

fn notify_targets(payload: &str) -> Vec<String> {
    let Ok(document) = serde_json::from_str::<Value>(payload) else {
        return Vec::new();
    };
    document
        .get(DEVICES_KEY)
        .and_then(Value::as_array)
        .map(|devices| {
            devices
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(name) => Some(name.clone()),
                    other => other.get("name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl DispatchLoop {
    /// Processes requests until the queue is closed and drained.
    pub async fn run(mut self) {
        info!(service_type = %self.service_type, "Dispatcher started");
        while let Some(request) = self.receiver.recv().await {
            let outcome = self.process(request).await;
            self.ctx.composer.compose(&outcome).await;
        }
        debug!(service_type = %self.service_type, "Queue closed");
    }

    /// Runs one request to completion.
    #[instrument(
        skip(self, request),
        fields(service_type = %self.service_type, transaction_id = %request.transaction_id)
    )]
    pub async fn process(&self, request: ChangeRequest) -> TransactionOutcome {
        let started_at = Utc::now();
        let request = Arc::new(request);
        audit_log!(AuditRecord::new(
            AuditCategory::TransactionLifecycle,
            "dispatcher",
            request.order_type.as_str(),
        )
        .with_transaction(&request.transaction_id));

        // A concluded transaction id is never run again; its rows stay as recorded.
        match self.ctx.store.read_transaction(&request.transaction_id).await {
            Ok(Some(existing)) if existing.status.is_terminal() => {
                audit_log!(AuditRecord::new(AuditCategory::TransactionLifecycle, "dispatcher", "replay")
                    .with_transaction(&request.transaction_id)
                    .with_details(json!({ "recorded_status": existing.status.as_str() }))
                    .with_outcome(AuditOutcome::Denied));
                warn!(recorded = %existing.status, "Transaction already concluded, request refused");
                return outcome(
                    &request,
                    existing.status,
                    Some(format!("transaction already concluded as {}", existing.status)),
                    Vec::new(),
                    started_at,
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Could not read transaction record, request refused");
                return outcome(
                    &request,
                    TransactionStatus::FailedTransient,
                    Some(format!("transaction store: {}", e)),
                    Vec::new(),
                    started_at,
                );
            }
        }

        if let Err(e) = self
            .ctx
            .store
            .write_transaction_status(
                WriteOp::Insert,
                &request.transaction_id,
                TransactionStatus::Running,
                &request.service_type,
                request.order_type,
                &request.payload,
            )
            .await
        {
            error!(error = %e, "Failed to record transaction start");
        }

        let prepared = match self.ctx.adapters.get(&self.service_type) {
            None => Err(format!("no service adapter for '{}'", self.service_type)),
            Some(adapter) => request
                .split(adapter.device_tag())
                .map(|split| (adapter, split))
                .map_err(|e| e.to_string()),
        };
        let (adapter, split) = match prepared {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!(reason = %reason, "Request refused");
                return self
                    .conclude(&request, TransactionStatus::FailedBadRequest, Some(reason), Vec::new(), started_at)
                    .await;
            }
        };

        info!(devices = split.sub_requests.len(), force = split.flags.force, "Dispatching device workflows");
        let mut workflows = JoinSet::new();
        let mut expected = Vec::with_capacity(split.sub_requests.len());
        for sub_request in split.sub_requests {
            expected.push(sub_request.device.clone());
            let workflow = DeviceWorkflow::new(
                Arc::clone(&self.ctx),
                Arc::clone(&adapter),
                Arc::clone(&request),
                sub_request,
                split.flags,
                self.waits.clone(),
            );
            workflows.spawn(workflow.run());
        }

        let mut devices = Vec::with_capacity(expected.len());
        while let Some(joined) = workflows.join_next().await {
            match joined {
                Ok(outcome) => devices.push(outcome),
                Err(e) => error!(error = %e, "Device workflow task failed"),
            }
        }
        for device in expected {
            if !devices.iter().any(|d| d.device == device) {
                devices.push(DeviceOutcome::failed(
                    device,
                    TransactionStatus::FailedOther,
                    "workflow task ended without a result",
                    Vec::new(),
                ));
            }
        }
        devices.sort_by(|a, b| a.device.cmp(&b.device));

        let worst = devices
            .iter()
            .fold(TransactionStatus::Completed, |acc, d| acc.worst(d.status));
        self.conclude(&request, worst, None, devices, started_at).await
    }

    async fn conclude(
        &self,
        request: &ChangeRequest,
        status: TransactionStatus,
        reason: Option<String>,
        devices: Vec<DeviceOutcome>,
        started_at: chrono::DateTime<Utc>,
    ) -> TransactionOutcome {
        let status = match self.ctx.subnormal.update_aggregate(request, status).await {
            Ok(current) => current,
            Err(e) => {
                error!(error = %e, "Failed to record transaction result");
                status
            }
        };

        let outcome_kind = if status == TransactionStatus::Completed {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        let failed = devices.iter().filter(|d| d.status != TransactionStatus::Completed).count();
        let mut record = AuditRecord::new(AuditCategory::TransactionLifecycle, "dispatcher", "finish")
            .with_transaction(&request.transaction_id)
            .with_details(json!({ "devices": devices.len(), "failed": failed }))
            .with_outcome(outcome_kind);
        if outcome_kind == AuditOutcome::Failure {
            record = record.with_error(status.as_str());
        }
        audit_log!(record);

        outcome(request, status, reason, devices, started_at)
    }
}

fn outcome(
    request: &ChangeRequest,
    status: TransactionStatus,
    reason: Option<String>,
    devices: Vec<DeviceOutcome>,
    started_at: chrono::DateTime<Utc>,
) -> TransactionOutcome {
    TransactionOutcome {
        transaction_id: request.transaction_id.clone(),
        service_type: request.service_type.clone(),
        order_type: request.order_type,
        status,
        code: status.error_code().map(str::to_string),
        reason,
        devices,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Dispatchers by service type.
#[derive(Default)]
pub struct Dispatchers {
    dispatchers: HashMap<String, Dispatcher>,
}

impl Dispatchers {
    /// Spawns one dispatcher per service type.
    pub fn spawn(ctx: Arc<AppContext>, service_types: &[String]) -> Self {
        let dispatchers = service_types
            .iter()
            .map(|service_type| {
                if ctx.adapters.get(service_type).is_none() {
                    warn!(%service_type, "No adapter registered, every request will be refused");
                }
                (
                    service_type.clone(),
                    Dispatcher::spawn(Arc::clone(&ctx), service_type.clone()),
                )
            })
            .collect();
        Self { dispatchers }
    }

    pub fn get(&self, service_type: &str) -> Option<&Dispatcher> {
        self.dispatchers.get(service_type)
    }

    pub fn submit(
        &self,
        service_type: &str,
        transaction_id: &str,
        order_type: OrderType,
        payload: &str,
    ) -> bool {
        match self.dispatchers.get(service_type) {
            Some(dispatcher) => dispatcher.submit(transaction_id, order_type, payload),
            None => {
                error!(service_type, transaction_id, "No dispatcher for service type");
                false
            }
        }
    }

    /// Returns `None` for an unknown service type.
    pub fn notify(
        &self,
        service_type: &str,
        transaction_id: &str,
        order_type: OrderType,
        payload: &str,
    ) -> Option<usize> {
        match self.dispatchers.get(service_type) {
            Some(dispatcher) => Some(dispatcher.notify(transaction_id, order_type, payload)),
            None => {
                error!(service_type, transaction_id, "No dispatcher for service type");
                None
            }
        }
    }

    pub async fn shutdown(self) {
        for (_, dispatcher) in self.dispatchers {
            dispatcher.shutdown().await;
        }
    }
}
