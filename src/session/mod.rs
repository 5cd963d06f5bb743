//! Session store: derived key material per device
//!
//! The durable form is an append-only JSON-lines log, one record per
//! successful join. Replaying the log attaches the last record per device
//! as that device's current session. Records whose device is no longer
//! provisioned are orphans and are dropped at load time.
//!
//! The store is a trait so the join procedure does not care whether the
//! backing store is a flat file or memory.

pub mod file;
pub mod memory;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::lorawan::crypto::AesKey;
use crate::lorawan::keys::SessionKeys;
use crate::registry::{DeviceRegistry, Eui64};

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

/// One derived session, also the on-disk record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "deveui", alias = "dev_eui")]
    pub dev_eui: Eui64,
    #[serde(rename = "devnonce", alias = "dev_nonce", with = "crate::hexfmt")]
    pub dev_nonce: [u8; 2],
    #[serde(rename = "appnonce", alias = "join_nonce", with = "crate::hexfmt")]
    pub join_nonce: [u8; 3],
    #[serde(rename = "nwkskey", alias = "nwk_skey", with = "crate::hexfmt")]
    pub nwk_skey: AesKey,
    #[serde(rename = "appskey", alias = "app_skey", with = "crate::hexfmt")]
    pub app_skey: AesKey,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub ts: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(dev_eui: Eui64, dev_nonce: [u8; 2], join_nonce: [u8; 3], keys: SessionKeys) -> Self {
        Self {
            dev_eui,
            dev_nonce,
            join_nonce,
            nwk_skey: keys.nwk_s_key,
            app_skey: keys.app_s_key,
            ts: Some(Utc::now()),
        }
    }

    pub fn keys(&self) -> SessionKeys {
        SessionKeys {
            nwk_s_key: self.nwk_skey,
            app_s_key: self.app_skey,
        }
    }
}

/// Counts from a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub attached: usize,
    pub orphaned: usize,
    pub skipped: usize,
}

/// Backing store for derived sessions
pub trait SessionStore: Send {
    /// Replay persisted records, attaching the latest record per
    /// provisioned device.
    fn load(&mut self, registry: &DeviceRegistry) -> anyhow::Result<LoadSummary>;

    /// Persist a new session and make it the device's current one.
    fn append(&mut self, session: &Session) -> anyhow::Result<()>;

    /// Current session for a device, if any.
    fn lookup(&self, dev_eui: &Eui64) -> Option<&Session>;
}

/// Attach one replayed record; shared by every store.
pub(crate) fn attach(
    current: &mut HashMap<Eui64, Session>,
    registry: &DeviceRegistry,
    session: Session,
    summary: &mut LoadSummary,
) {
    if registry.lookup(&session.dev_eui).is_none() {
        warn!(
            "OrphanedSession: discarding session for unprovisioned device {}",
            session.dev_eui
        );
        summary.orphaned += 1;
        return;
    }

    debug!(
        "Attached session for {} (JoinNonce {})",
        session.dev_eui,
        hex::encode_upper(session.join_nonce)
    );
    current.insert(session.dev_eui, session);
    summary.attached += 1;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const DEV_EUI: &str = "0102030405060708";

    pub fn registry() -> DeviceRegistry {
        let keys = format!(
            r#"{{"deveui":"{}","appeui":"0000000000000001","appkey":"2B7E151628AED2A6ABF7158809CF4F3C","netid":"000013","devaddr":"260B1234"}}"#,
            DEV_EUI
        );
        DeviceRegistry::load(keys.as_bytes()).unwrap()
    }

    pub fn session(dev_eui: &str, join_nonce: [u8; 3]) -> Session {
        Session {
            dev_eui: Eui64::from_display_hex(dev_eui).unwrap(),
            dev_nonce: [0x42, 0x00],
            join_nonce,
            nwk_skey: [0x11; 16],
            app_skey: [0x22; 16],
            ts: None,
        }
    }

    #[test]
    fn test_record_uses_log_field_names() {
        let line = serde_json::to_string(&session(DEV_EUI, [0xFE, 0xA9, 0xB8])).unwrap();
        assert_eq!(
            line,
            r#"{"deveui":"0102030405060708","devnonce":"4200","appnonce":"FEA9B8","nwkskey":"11111111111111111111111111111111","appskey":"22222222222222222222222222222222"}"#
        );
    }

    #[test]
    fn test_record_parses_with_timestamp() {
        let line = r#"{"deveui":"0102030405060708","devnonce":"4200","appnonce":"fea9b8","nwkskey":"11111111111111111111111111111111","appskey":"22222222222222222222222222222222","ts":1727183838}"#;
        let parsed: Session = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.dev_eui.wire(), &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(parsed.join_nonce, [0xFE, 0xA9, 0xB8]);
        assert_eq!(parsed.ts.map(|t| t.timestamp()), Some(1727183838));
    }

    #[test]
    fn test_attach_discards_orphans() {
        let registry = registry();
        let mut current = HashMap::new();
        let mut summary = LoadSummary::default();

        attach(&mut current, &registry, session("FFFFFFFFFFFFFFFF", [1, 2, 3]), &mut summary);
        attach(&mut current, &registry, session(DEV_EUI, [1, 2, 3]), &mut summary);

        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.attached, 1);
        assert_eq!(current.len(), 1);
    }
}
