//! OTAA join procedure
//!
//! `JoinServer` owns the device registry and the session store. A join runs
//! lookup → MIC check → key derivation → persist → Join-Accept, with steps
//! from the lookup onwards serialized per device so two racing requests for
//! one DevEUI cannot persist a session the device never received.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::JoinConfig;
use crate::error::{JoinError, Result};
use crate::lorawan::crypto::verify_mic;
use crate::lorawan::encoder::JoinAcceptBuilder;
use crate::lorawan::keys::{derive_session_keys, random_join_nonce, NoncePolicy};
use crate::lorawan::{JoinRequest, JOIN_REQUEST_MIC_OFFSET};
use crate::registry::{DeviceIdentity, DeviceRegistry, Eui64};
use crate::session::{Session, SessionStore};

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinAccept {
    /// On-air frame: MHDR followed by the encrypted accept
    pub frame: Vec<u8>,
    pub session: Session,
}

/// Explicit join-server context
pub struct JoinServer {
    registry: DeviceRegistry,
    sessions: Mutex<Box<dyn SessionStore>>,
    in_flight: DashMap<Eui64, Arc<Mutex<()>>>,
    config: JoinConfig,
}

impl JoinServer {
    pub fn new(registry: DeviceRegistry, sessions: Box<dyn SessionStore>, config: JoinConfig) -> Self {
        Self {
            registry,
            sessions: Mutex::new(sessions),
            in_flight: DashMap::new(),
            config,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Current session for a device, cloned out of the store.
    pub fn current_session(&self, dev_eui: &Eui64) -> Option<Session> {
        self.sessions.lock().lookup(dev_eui).cloned()
    }

    /// Run the join procedure on a raw Join-Request frame.
    pub fn join(&self, frame: &[u8]) -> Result<JoinAccept> {
        let request = JoinRequest::parse(frame)?;
        info!("LoRaWAN {}", request);

        let device = self
            .registry
            .lookup(&request.dev_eui)
            .ok_or(JoinError::UnknownDevice(request.dev_eui))?;

        let lock = self
            .in_flight
            .entry(request.dev_eui)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        if !verify_mic(&device.app_key, &frame[..JOIN_REQUEST_MIC_OFFSET], &request.mic) {
            return Err(JoinError::IntegrityCheckFailed(request.dev_eui));
        }

        let session = self.derive_session(device, request.dev_nonce);
        self.persist(&session)?;

        let frame = JoinAcceptBuilder::new(session.join_nonce, device.net_id, device.dev_addr)
            .build(&device.app_key);
        info!(
            "JoinAccept for {} DevAddr={} JoinNonce={} ({} bytes)",
            device.dev_eui,
            hex::encode_upper(device.dev_addr),
            hex::encode_upper(session.join_nonce),
            frame.len()
        );

        Ok(JoinAccept { frame, session })
    }

    /// Pick the JoinNonce for this join according to the nonce policy.
    pub fn join_nonce_for(&self, device: &DeviceIdentity) -> [u8; 3] {
        match self.config.nonce_policy {
            NoncePolicy::Fresh => random_join_nonce(),
            NoncePolicy::Reuse => self
                .current_session(&device.dev_eui)
                .map(|s| s.join_nonce)
                .or(device.join_nonce)
                .unwrap_or_else(random_join_nonce),
        }
    }

    /// Derive the session for a verified request. No I/O.
    pub fn derive_session(&self, device: &DeviceIdentity, dev_nonce: [u8; 2]) -> Session {
        let join_nonce = self.join_nonce_for(device);
        let keys = derive_session_keys(
            &device.app_key,
            &join_nonce,
            &device.net_id,
            &dev_nonce,
            self.config.key_prefixes,
        );
        debug!(
            "Session keys for {}: NwkSKey={} AppSKey={}",
            device.dev_eui,
            hex::encode_upper(keys.nwk_s_key),
            hex::encode_upper(keys.app_s_key)
        );
        Session::new(device.dev_eui, dev_nonce, join_nonce, keys)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        self.sessions.lock().append(session).map_err(|source| {
            warn!("Session for {} not persisted: {:#}", session.dev_eui, source);
            JoinError::SessionPersist {
                dev_eui: session.dev_eui,
                source,
            }
        })
    }
}
