//! User-initiated scan cancellation.
//!
//! Cancellation means "stop accepting results": the poll timer is cancelled
//! and any status answer still in flight is dropped, but network calls that
//! already left are not aborted.

use log::{debug, info, warn};

use crate::backend::ScanBackend;
use crate::polling::PollingEngine;
use crate::scan_session::ScanSession;
use crate::session_store::SessionStore;

/// Message recorded on the wizard when the user stops a scan.
pub const STOPPED_BY_USER: &str = "stopped by user";

/// Result of [`CancellationManager::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The scan was stopped locally. `acknowledged` tells whether the
    /// service confirmed the stop.
    Stopped { acknowledged: bool },
    /// The session had already ended; nothing was done
    NotActive,
}

/// Tears down a running scan.
pub struct CancellationManager<'a, B: ScanBackend, S: SessionStore + ?Sized> {
    backend: &'a B,
    store: &'a S,
    polling: Option<&'a PollingEngine<B>>,
}

impl<'a, B: ScanBackend, S: SessionStore + ?Sized> CancellationManager<'a, B, S> {
    pub fn new(backend: &'a B, store: &'a S) -> Self {
        Self {
            backend,
            store,
            polling: None,
        }
    }

    /// Also stop `polling` when cancelling.
    #[must_use]
    pub fn with_polling(mut self, polling: &'a PollingEngine<B>) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Stop `session`: cancel polling, ask the service to stop, and clear the
    /// persisted record if it belongs to this scan.
    ///
    /// A failed stop request or store error does not prevent the local stop.
    /// Stopping a session that already ended is a no-op.
    pub async fn stop(&self, session: &mut ScanSession) -> CancelOutcome {
        if session.status().is_terminal() {
            debug!("Scan {} already ended, nothing to stop", session.scan_id());
            return CancelOutcome::NotActive;
        }

        if let Some(polling) = self.polling {
            polling.stop();
        }

        let acknowledged = session.stop(self.backend).await.is_ok();

        if let Err(e) = self.store.clear_matching(session.scan_id()) {
            warn!(
                "⚠️  Could not clear session record for scan {}: {e}",
                session.scan_id()
            );
        }

        info!("🛑 Scan {} {STOPPED_BY_USER}", session.scan_id());
        CancelOutcome::Stopped { acknowledged }
    }
}
