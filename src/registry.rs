//! Device registry: provisioned identities and root keys
//!
//! Loaded once at startup from a JSON-lines provisioning file:
//!
//! ```text
//! # deveui/appeui are written most-significant byte first
//! {"deveui":"70B3D57ED0000001","appeui":"0000000000000001","appkey":"2B7E1516...","netid":"000013","devaddr":"260B1234"}
//! ```
//!
//! EUIs are byte-reversed on load so lookups use on-wire order directly.

use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;

use anyhow::Context;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::lorawan::crypto::AesKey;

/// 64-bit EUI held in on-wire (little-endian) order.
///
/// `Display` prints the conventional most-significant-first form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eui64([u8; 8]);

impl Eui64 {
    pub fn from_wire(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Parse the human-readable form used in files and logs.
    pub fn from_display_hex(s: &str) -> anyhow::Result<Self> {
        let mut bytes: [u8; 8] = crate::hexfmt::decode_array(s)?;
        bytes.reverse();
        Ok(Self(bytes))
    }

    pub fn wire(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_display_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode_upper(bytes)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

// Files carry the display form; conversion to wire order happens here.
impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_display_hex())
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Eui64::from_display_hex(&s).map_err(de::Error::custom)
    }
}

/// A provisioned end device
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub dev_eui: Eui64,
    pub join_eui: Eui64,
    pub app_key: AesKey,
    pub net_id: [u8; 3],
    pub dev_addr: [u8; 4],
    /// Administratively assigned JoinNonce, used under the `reuse` policy
    pub join_nonce: Option<[u8; 3]>,
}

/// One line of the provisioning file
#[derive(Debug, Deserialize)]
struct ProvisioningRecord {
    #[serde(alias = "dev_eui")]
    deveui: Eui64,
    #[serde(alias = "joineui", alias = "join_eui", alias = "app_eui")]
    appeui: Eui64,
    #[serde(alias = "app_key", with = "crate::hexfmt")]
    appkey: [u8; 16],
    #[serde(alias = "net_id", with = "crate::hexfmt")]
    netid: [u8; 3],
    #[serde(alias = "dev_addr", with = "crate::hexfmt")]
    devaddr: [u8; 4],
    #[serde(default, alias = "join_nonce", with = "crate::hexfmt::option")]
    appnonce: Option<[u8; 3]>,
}

impl From<ProvisioningRecord> for DeviceIdentity {
    fn from(rec: ProvisioningRecord) -> Self {
        Self {
            dev_eui: rec.deveui,
            join_eui: rec.appeui,
            app_key: rec.appkey,
            net_id: rec.netid,
            dev_addr: rec.devaddr,
            join_nonce: rec.appnonce,
        }
    }
}

/// Lines that carry no record
pub(crate) fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

/// Provisioned devices keyed by wire-order DevEUI
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<Eui64, DeviceIdentity>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse provisioning records, one per line. Later duplicates win.
    pub fn load<R: BufRead>(source: R) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        for (idx, line) in source.lines().enumerate() {
            let line = line.context("failed to read provisioning data")?;
            let line = line.trim();
            if is_skippable(line) {
                continue;
            }

            let record: ProvisioningRecord = serde_json::from_str(line)
                .with_context(|| format!("invalid provisioning record on line {}", idx + 1))?;
            let device = DeviceIdentity::from(record);

            debug!("Provisioned device {} (JoinEUI {})", device.dev_eui, device.join_eui);
            registry.insert(device);
        }

        Ok(registry)
    }

    /// Load the provisioning file. A missing file gives an empty registry.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!("Provisioning file {:?} not found, no devices can join", path);
            return Ok(Self::new());
        }

        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open provisioning file {:?}", path))?;
        let registry = Self::load(std::io::BufReader::new(file))
            .with_context(|| format!("failed to load provisioning file {:?}", path))?;
        info!("Loaded {} device(s) from {:?}", registry.len(), path);
        Ok(registry)
    }

    /// Add or replace a device.
    pub fn insert(&mut self, device: DeviceIdentity) {
        if let Some(old) = self.devices.insert(device.dev_eui, device) {
            warn!("Duplicate provisioning for device {}, keeping the later record", old.dev_eui);
        }
    }

    pub fn lookup(&self, dev_eui: &Eui64) -> Option<&DeviceIdentity> {
        self.devices.get(dev_eui)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEYS: &str = r#"
# test fleet
{"deveui":"0102030405060708","appeui":"A1A2A3A4A5A6A7A8","appkey":"2B7E151628AED2A6ABF7158809CF4F3C","netid":"000013","devaddr":"260B1234"}

{"dev_eui":"1112131415161718","join_eui":"0000000000000001","app_key":"00112233445566778899AABBCCDDEEFF","net_id":"000000","dev_addr":"01020304","join_nonce":"FEA9B8"}
"#;

    #[test]
    fn test_eui_display_roundtrip() {
        let eui = Eui64::from_display_hex("0102030405060708").unwrap();
        assert_eq!(eui.wire(), &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(eui.to_string(), "0102030405060708");
    }

    #[test]
    fn test_load_skips_comments_and_reverses_euis() {
        let registry = DeviceRegistry::load(KEYS.as_bytes()).unwrap();
        assert_eq!(registry.len(), 2);

        let wire = Eui64::from_wire([8, 7, 6, 5, 4, 3, 2, 1]);
        let device = registry.lookup(&wire).expect("device by wire-order EUI");
        assert_eq!(device.join_eui.wire(), &[0xA8, 0xA7, 0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1]);
        assert_eq!(device.net_id, [0x00, 0x00, 0x13]);
        assert_eq!(device.dev_addr, [0x26, 0x0B, 0x12, 0x34]);
        assert_eq!(device.join_nonce, None);

        let second = registry
            .lookup(&Eui64::from_display_hex("1112131415161718").unwrap())
            .unwrap();
        assert_eq!(second.join_nonce, Some([0xFE, 0xA9, 0xB8]));
    }

    #[test]
    fn test_lookup_by_display_order_misses() {
        let registry = DeviceRegistry::load(KEYS.as_bytes()).unwrap();
        let display_order = Eui64::from_wire([1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(registry.lookup(&display_order).is_none());
    }

    #[test]
    fn test_duplicate_dev_eui_last_wins() {
        let keys = concat!(
            r#"{"deveui":"0102030405060708","appeui":"0000000000000000","appkey":"00000000000000000000000000000000","netid":"000000","devaddr":"00000001"}"#,
            "\n",
            r#"{"deveui":"0102030405060708","appeui":"0000000000000000","appkey":"00000000000000000000000000000000","netid":"000000","devaddr":"00000002"}"#,
            "\n",
        );
        let registry = DeviceRegistry::load(keys.as_bytes()).unwrap();
        assert_eq!(registry.len(), 1);
        let device = registry
            .lookup(&Eui64::from_display_hex("0102030405060708").unwrap())
            .unwrap();
        assert_eq!(device.dev_addr, [0, 0, 0, 2]);
    }

    #[test]
    fn test_malformed_record_names_line() {
        let keys = "# header\n{\"deveui\":\"0102\"}\n";
        let err = DeviceRegistry::load(keys.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_short_key_is_rejected() {
        let keys = r#"{"deveui":"0102030405060708","appeui":"0000000000000000","appkey":"0011","netid":"000000","devaddr":"00000001"}"#;
        assert!(DeviceRegistry::load(keys.as_bytes()).is_err());
    }

    #[test]
    fn test_load_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::load_file(&dir.path().join("absent.txt")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KEYS.as_bytes()).unwrap();
        let registry = DeviceRegistry::load_file(file.path()).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
