use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use libwirecrab_dissect::dissectors::DissectorsFactory;
use libwirecrab_dissect::{DissectionEngine, DissectorRegistry, PacketRecord};
use libwirecrab_tools::Config;
use tracing::{debug, info, warn};

use crate::details::{DetailsLookup, PacketDetails};
use crate::error::{CaptureError, DetailsError};
use crate::session::{CaptureSession, SessionState};
use crate::settings::CaptureSettings;
use crate::store::PacketStore;

/// Capture orchestration: owns the packet store and at most one capture session
///
/// All methods take `&self`, the service can be shared between threads.
pub struct CaptureService {
    settings: CaptureSettings,
    engine: DissectionEngine,
    store: Arc<PacketStore>,
    session: Mutex<Option<CaptureSession>>,
    state: RwLock<SessionState>,
}

impl CaptureService {
    /// Build a service with all built-in dissectors
    pub fn new(config: &Config) -> Result<CaptureService, CaptureError> {
        let registry = DissectorsFactory::default().build_dissectors(config);
        CaptureService::with_registry(config, Arc::new(registry))
    }

    /// Build a service using the dissectors of `registry`
    pub fn with_registry(
        config: &Config,
        registry: Arc<DissectorRegistry>,
    ) -> Result<CaptureService, CaptureError> {
        let settings = CaptureSettings::from_config(config)?;
        debug!(
            "capture service: backend={}, store capacity={}, {} dissectors",
            settings.backend,
            settings.store_capacity,
            registry.num_dissectors()
        );
        let engine = DissectionEngine::new(registry, config);
        let store = Arc::new(PacketStore::new(settings.store_capacity));
        Ok(CaptureService {
            settings,
            engine,
            store,
            session: Mutex::new(None),
            state: RwLock::new(SessionState::Idle),
        })
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<CaptureSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Start capturing on `device`. A running capture is stopped first.
    pub fn start(&self, device: &str) -> Result<(), CaptureError> {
        let mut session = self.lock_session();
        if let Some(previous) = session.take() {
            self.set_state(SessionState::Stopping);
            info!("stopping capture on {}", previous.device());
            previous.stop();
        }
        self.set_state(SessionState::Starting);
        if self.settings.clear_on_start {
            self.store.clear();
        }
        match CaptureSession::start(device, &self.settings, &self.engine, self.store.clone()) {
            Ok(s) => {
                *session = Some(s);
                self.set_state(SessionState::Running);
                Ok(())
            }
            Err(e) => {
                warn!("could not start capture on {}: {}", device, e);
                self.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Stop the current capture, if any
    ///
    /// When this returns, the store is no longer written to.
    pub fn stop(&self) {
        let mut session = self.lock_session();
        if let Some(s) = session.take() {
            self.set_state(SessionState::Stopping);
            info!("stopping capture on {}", s.device());
            s.stop();
        }
        self.set_state(SessionState::Idle);
    }

    /// Return at most `limit` records, starting at `offset` (0 is the oldest retained record)
    pub fn get_packets(&self, offset: usize, limit: usize) -> Vec<PacketRecord> {
        self.store.get_packets(offset, limit)
    }

    pub fn get_packet_count(&self) -> usize {
        self.store.count()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Decode frame `number` of the current capture again, with hex dump
    pub fn get_packet_details(&self, number: u64) -> Result<PacketDetails, DetailsError> {
        let session = self.lock_session();
        let recording = session
            .as_ref()
            .and_then(|s| s.recording())
            .ok_or(DetailsError::NoRecording)?;
        let lookup = DetailsLookup {
            engine: &self.engine,
            decoder: self.settings.details_decoder,
            tshark_path: &self.settings.tshark_path,
        };
        lookup.lookup(recording, number)
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device of the current capture
    pub fn device(&self) -> Option<String> {
        self.lock_session().as_ref().map(|s| s.device().to_string())
    }

    /// Return true if a capture is running and its source is not exhausted
    pub fn is_capturing(&self) -> bool {
        self.lock_session()
            .as_ref()
            .map(|s| !s.is_finished())
            .unwrap_or(false)
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn engine(&self) -> &DissectionEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<PacketStore> {
        &self.store
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.stop();
    }
}
