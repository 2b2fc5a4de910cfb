//! Per-connection serve loop

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::correlator::{Correlator, SharedCorrelator};
use crate::application::handlers::SharedHandlerTable;
use crate::domain::SessionState;

/// One admitted connection: its state and its correlator.
///
/// The state is owned by [`Session::serve`] and handed back when the
/// transport closes; other tasks reach the session only through the
/// correlator handle.
pub struct Session {
    state: SessionState,
    correlator: SharedCorrelator,
}

impl Session {
    pub fn new(
        charge_point_id: &str,
        outbound: mpsc::UnboundedSender<String>,
        handlers: SharedHandlerTable,
        connector_count: u32,
    ) -> Self {
        Self {
            state: SessionState::new(charge_point_id, connector_count),
            correlator: Arc::new(Correlator::new(charge_point_id, outbound, handlers)),
        }
    }

    pub fn correlator(&self) -> SharedCorrelator {
        self.correlator.clone()
    }

    /// Process inbound frames one at a time until `inbound` closes.
    pub async fn serve(mut self, mut inbound: mpsc::UnboundedReceiver<String>) -> SessionState {
        let charge_point_id = self.state.charge_point_id().to_string();
        info!(charge_point_id = charge_point_id.as_str(), "Session started");

        while let Some(text) = inbound.recv().await {
            debug!(charge_point_id = charge_point_id.as_str(), frame = text.as_str(), "<-");
            self.correlator.on_inbound(&mut self.state, &text).await;
        }

        self.correlator.fail_all_pending();
        info!(
            charge_point_id = charge_point_id.as_str(),
            powered_up = self.state.is_powered_up(),
            "Session ended"
        );
        self.state
    }
}
