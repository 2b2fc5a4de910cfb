//! Call/reply correlation for one session
//!
//! ```text
//! caller task ──send_call──► pending[id] ──Call──► transport
//!                               ▲
//! serve loop ──on_inbound──► CallResult/CallError[id] completes pending[id]
//!                        └─► Call ──HandlerTable──► CallResult/CallError ──► transport
//! ```
//!
//! Removing an entry from `pending` is the only way a call is completed, so
//! a reply and a timeout racing for the same id resolve exactly once: whoever
//! removes the entry wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::handlers::{CallErrorReply, SharedHandlerTable};
use crate::domain::SessionState;
use crate::shared::ocpp_frame::{ErrorCode, FrameError, OcppFrame};

/// Why an outbound call did not produce a result payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallFailure {
    #[error("no reply within the call timeout")]
    Timeout,
    #[error("peer replied with {code}: {description}")]
    PeerError {
        code: String,
        description: String,
        details: Value,
    },
    #[error("session transport closed")]
    ConnectionClosed,
    #[error("correlation id {0} is already outstanding")]
    DuplicateCorrelationId(String),
    #[error("invalid reply payload: {0}")]
    InvalidResponse(String),
}

type ReplySlot = oneshot::Sender<Result<Value, CallFailure>>;

/// One outstanding outbound call.
struct PendingCall {
    action: String,
    issued_at: Instant,
    response_slot: ReplySlot,
}

/// Removes the pending entry if the issuing future is dropped mid-flight.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingCall>,
    unique_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.unique_id);
    }
}

fn record_call(action: &str, outcome: &'static str, started: Instant) {
    metrics::counter!("ocpp_calls_total", "action" => action.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("ocpp_call_latency_seconds", "action" => action.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub struct Correlator {
    charge_point_id: String,
    outbound: mpsc::UnboundedSender<String>,
    pending: DashMap<String, PendingCall>,
    handlers: SharedHandlerTable,
    closed: AtomicBool,
}

pub type SharedCorrelator = Arc<Correlator>;

impl Correlator {
    pub fn new(
        charge_point_id: impl Into<String>,
        outbound: mpsc::UnboundedSender<String>,
        handlers: SharedHandlerTable,
    ) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            outbound,
            pending: DashMap::new(),
            handlers,
            closed: AtomicBool::new(false),
        }
    }

    pub fn charge_point_id(&self) -> &str {
        &self.charge_point_id
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Outbound ───────────────────────────────────────────

    /// Send a Call under a fresh correlation id and wait for its reply.
    pub async fn send_call(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, CallFailure> {
        let unique_id = Uuid::new_v4().to_string();
        self.send_call_with_id(unique_id, action, payload, timeout)
            .await
    }

    pub(crate) async fn send_call_with_id(
        &self,
        unique_id: String,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, CallFailure> {
        let (tx, mut rx) = oneshot::channel();
        let started = Instant::now();

        match self.pending.entry(unique_id.clone()) {
            Entry::Occupied(_) => {
                error!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    message_id = unique_id.as_str(),
                    "Correlation id already outstanding"
                );
                return Err(CallFailure::DuplicateCorrelationId(unique_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    action: action.to_string(),
                    issued_at: started,
                    response_slot: tx,
                });
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            unique_id: &unique_id,
        };

        // Checked after the insert so a concurrent `fail_all_pending` either
        // sees the entry or this call sees the flag.
        if self.closed.load(Ordering::SeqCst) {
            debug!(
                charge_point_id = self.charge_point_id.as_str(),
                action,
                message_id = unique_id.as_str(),
                "Session already closed, call not sent"
            );
            record_call(action, "closed", started);
            return Err(CallFailure::ConnectionClosed);
        }

        let frame = OcppFrame::Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };

        info!(
            charge_point_id = self.charge_point_id.as_str(),
            action,
            message_id = unique_id.as_str(),
            "Sending call"
        );

        if self.outbound.send(frame.serialize()).is_err() {
            record_call(action, "closed", started);
            return Err(CallFailure::ConnectionClosed);
        }

        let result = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallFailure::ConnectionClosed),
            Err(_) => {
                if self.pending.remove(&unique_id).is_some() {
                    warn!(
                        charge_point_id = self.charge_point_id.as_str(),
                        action,
                        message_id = unique_id.as_str(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Call timed out"
                    );
                    Err(CallFailure::Timeout)
                } else {
                    // The serve loop took the entry first; its reply is in the slot.
                    rx.await.unwrap_or(Err(CallFailure::ConnectionClosed))
                }
            }
        };

        let outcome = match &result {
            Ok(_) => "result",
            Err(CallFailure::PeerError { .. }) => "error",
            Err(CallFailure::Timeout) => "timeout",
            Err(_) => "closed",
        };
        record_call(action, outcome, started);

        result
    }

    // ── Inbound ────────────────────────────────────────────

    /// Process one raw frame from the transport.
    ///
    /// Only the session's serve loop calls this, one frame at a time.
    pub async fn on_inbound(&self, state: &mut SessionState, raw: &str) {
        match OcppFrame::parse(raw) {
            Ok(OcppFrame::Call {
                unique_id,
                action,
                payload,
            }) => self.handle_call(state, unique_id, &action, payload).await,

            Ok(OcppFrame::CallResult { unique_id, payload }) => {
                self.complete(&unique_id, Ok(payload));
            }

            Ok(OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            }) => {
                self.complete(
                    &unique_id,
                    Err(CallFailure::PeerError {
                        code: error_code,
                        description: error_description,
                        details: error_details,
                    }),
                );
            }

            Err(e) => self.reject_frame(raw, e),
        }
    }

    async fn handle_call(
        &self,
        state: &mut SessionState,
        unique_id: String,
        action: &str,
        payload: Value,
    ) {
        debug!(
            charge_point_id = self.charge_point_id.as_str(),
            action,
            message_id = unique_id.as_str(),
            "Received call"
        );

        let outcome = match self.handlers.get(action) {
            Some(handler) => handler.handle(state, payload).await,
            None => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    message_id = unique_id.as_str(),
                    "No handler for action"
                );
                Err(CallErrorReply::new(
                    ErrorCode::NotImplemented,
                    format!("Action {} is not implemented", action),
                ))
            }
        };

        let reply = match outcome {
            Ok(payload) => OcppFrame::CallResult { unique_id, payload },
            Err(rejection) => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    message_id = unique_id.as_str(),
                    error_code = rejection.code.as_str(),
                    description = rejection.description.as_str(),
                    "Replying with CallError"
                );
                OcppFrame::error_response(
                    unique_id,
                    rejection.code,
                    rejection.description,
                    rejection.details,
                )
            }
        };

        self.transmit(reply);
    }

    fn complete(&self, unique_id: &str, outcome: Result<Value, CallFailure>) {
        let Some((_, pending)) = self.pending.remove(unique_id) else {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id,
                "Reply for unknown or expired correlation id, discarding"
            );
            return;
        };

        info!(
            charge_point_id = self.charge_point_id.as_str(),
            action = pending.action.as_str(),
            message_id = unique_id,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Reply correlated"
        );

        if pending.response_slot.send(outcome).is_err() {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id,
                "Caller went away before its reply arrived"
            );
        }
    }

    fn reject_frame(&self, raw: &str, err: FrameError) {
        match OcppFrame::salvage_unique_id(raw) {
            Some(unique_id) => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    message_id = unique_id.as_str(),
                    error = %err,
                    "Malformed call, replying with CallError"
                );
                self.transmit(OcppFrame::error_response(
                    unique_id,
                    err.error_code(),
                    err.to_string(),
                    Value::Object(Default::default()),
                ));
            }
            None => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    error = %err,
                    raw,
                    "Dropping undecodable frame"
                );
            }
        }
    }

    fn transmit(&self, frame: OcppFrame) {
        if self.outbound.send(frame.serialize()).is_err() {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = frame.unique_id(),
                "Transport closed, reply not sent"
            );
        }
    }

    /// Resolve every outstanding call with `ConnectionClosed` and refuse
    /// any call issued afterwards.
    pub fn fail_all_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.response_slot.send(Err(CallFailure::ConnectionClosed));
            }
        }
    }
}
