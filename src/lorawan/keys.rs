//! LoRaWAN 1.0 session key derivation
//!
//! - NwkSKey for network-layer MIC and MAC command encryption
//! - AppSKey for application payload encryption
//!
//! Both keys are `AES128-Encrypt(AppKey, pad16(prefix ∥ JoinNonce ∥ NetID ∥ DevNonce))`.
//! Deployments disagree on the prefix bytes, so the pair is a
//! configuration choice ([`KeyPrefixes`]).

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;

use super::crypto::{aes128_encrypt_block, AesKey, BLOCK_SIZE};

/// Prefix bytes for the NwkSKey / AppSKey derivation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPrefixes {
    /// 0x01 for NwkSKey, 0x02 for AppSKey
    #[default]
    Lorawan,
    /// 0x00 for NwkSKey, 0x01 for AppSKey
    ZeroBased,
}

impl KeyPrefixes {
    /// (NwkSKey prefix, AppSKey prefix)
    pub fn bytes(self) -> (u8, u8) {
        match self {
            KeyPrefixes::Lorawan => (0x01, 0x02),
            KeyPrefixes::ZeroBased => (0x00, 0x01),
        }
    }
}

/// How the server-side JoinNonce is chosen for each join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoncePolicy {
    /// Draw three random bytes on every join.
    #[default]
    Fresh,
    /// Keep the nonce of the device's current session, or its provisioned
    /// nonce; draw a fresh one only when neither exists.
    Reuse,
}

/// Derived key material for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub nwk_s_key: AesKey,
    pub app_s_key: AesKey,
}

/// Draw a random 3-byte JoinNonce from the OS generator.
pub fn random_join_nonce() -> [u8; 3] {
    let mut nonce = [0u8; 3];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn derivation_block(prefix: u8, join_nonce: &[u8; 3], net_id: &[u8; 3], dev_nonce: &[u8; 2]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = prefix;
    block[1..4].copy_from_slice(join_nonce);
    block[4..7].copy_from_slice(net_id);
    block[7..9].copy_from_slice(dev_nonce);
    block
}

/// Derive NwkSKey and AppSKey. All inputs are taken in on-wire byte order.
pub fn derive_session_keys(
    app_key: &AesKey,
    join_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: &[u8; 2],
    prefixes: KeyPrefixes,
) -> SessionKeys {
    let (nwk, app) = prefixes.bytes();
    SessionKeys {
        nwk_s_key: aes128_encrypt_block(app_key, &derivation_block(nwk, join_nonce, net_id, dev_nonce)),
        app_s_key: aes128_encrypt_block(app_key, &derivation_block(app, join_nonce, net_id, dev_nonce)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_KEY: AesKey = [
        0x52, 0x01, 0xB4, 0xDA, 0x2B, 0x4D, 0x5A, 0x62, 0x04, 0x1F, 0x53, 0x9C, 0xFE, 0x3F, 0xB4,
        0x0D,
    ];

    #[test]
    fn test_nwk_skey_reference_vector() {
        // 01 | FEA9B8 | 000000 | 81F1, zero padded
        let keys = derive_session_keys(
            &APP_KEY,
            &[0xFE, 0xA9, 0xB8],
            &[0x00, 0x00, 0x00],
            &[0x81, 0xF1],
            KeyPrefixes::Lorawan,
        );
        assert_eq!(
            hex::encode_upper(keys.nwk_s_key),
            "841B3252F2E205B6071A9A0320986B27"
        );
        assert_ne!(keys.nwk_s_key, keys.app_s_key);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_session_keys(&APP_KEY, &[1, 2, 3], &[0, 0, 0x13], &[0x42, 0], KeyPrefixes::Lorawan);
        let b = derive_session_keys(&APP_KEY, &[1, 2, 3], &[0, 0, 0x13], &[0x42, 0], KeyPrefixes::Lorawan);
        assert_eq!(a, b);

        let other_nonce = derive_session_keys(&APP_KEY, &[1, 2, 4], &[0, 0, 0x13], &[0x42, 0], KeyPrefixes::Lorawan);
        assert_ne!(a, other_nonce);
    }

    #[test]
    fn test_zero_based_prefixes_shift_keys() {
        let lorawan = derive_session_keys(&APP_KEY, &[9, 9, 9], &[1, 2, 3], &[4, 5], KeyPrefixes::Lorawan);
        let zero = derive_session_keys(&APP_KEY, &[9, 9, 9], &[1, 2, 3], &[4, 5], KeyPrefixes::ZeroBased);

        // 0x01 is the AppSKey prefix in one scheme and the NwkSKey prefix in the other
        assert_eq!(zero.app_s_key, lorawan.nwk_s_key);
        assert_ne!(zero.nwk_s_key, lorawan.nwk_s_key);
    }

    #[test]
    fn test_random_join_nonce_varies() {
        let nonces: Vec<[u8; 3]> = (0..8).map(|_| random_join_nonce()).collect();
        assert!(nonces.iter().any(|n| *n != nonces[0]));
    }
}
