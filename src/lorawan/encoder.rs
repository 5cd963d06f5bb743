//! LoRaWAN join frame encoders
//!
//! Join-Accept (server → device), encrypted for the air:
//!   MHDR(1) | AES-Dec(AppKey, JoinNonce(3) | NetID(3) | DevAddr(4) | DLSettings(1) | RxDelay(1) | MIC(4))
//!
//! Join-Request (device → server), used by the device simulator and tests:
//!   MHDR(1) | JoinEUI(8) | DevEUI(8) | DevNonce(2) | MIC(4)

use bytes::{BufMut, BytesMut};

use super::crypto::{compute_mic, decrypt_join_accept, encrypt_join_accept, verify_mic, AesKey, MIC_SIZE};
use super::JOIN_REQUEST_LEN;
use crate::registry::Eui64;

/// MHDR of a Join-Accept: frame type 1, major version 0
pub const JOIN_ACCEPT_MHDR: u8 = 0x20;

/// MHDR of a Join-Request: frame type 0, major version 0
pub const JOIN_REQUEST_MHDR: u8 = 0x00;

/// Join-Accept body without the optional CFList
pub const JOIN_ACCEPT_BODY_LEN: usize = 12;

/// Parameters for building a Join-Accept
#[derive(Debug, Clone)]
pub struct JoinAcceptBuilder {
    pub join_nonce: [u8; 3],
    pub net_id: [u8; 3],
    pub dev_addr: [u8; 4],
    pub dl_settings: u8,
    pub rx_delay: u8,
}

impl JoinAcceptBuilder {
    /// Accept with default downlink settings and RX delay, no CFList
    pub fn new(join_nonce: [u8; 3], net_id: [u8; 3], dev_addr: [u8; 4]) -> Self {
        Self {
            join_nonce,
            net_id,
            dev_addr,
            dl_settings: 0,
            rx_delay: 0,
        }
    }

    /// JoinNonce | NetID | DevAddr | DLSettings | RxDelay
    pub fn body(&self) -> BytesMut {
        let mut body = BytesMut::with_capacity(JOIN_ACCEPT_BODY_LEN + MIC_SIZE);
        body.put_slice(&self.join_nonce);
        body.put_slice(&self.net_id);
        body.put_slice(&self.dev_addr);
        body.put_u8(self.dl_settings);
        body.put_u8(self.rx_delay);
        body
    }

    /// Body followed by its MIC, before encryption
    pub fn plaintext(&self, app_key: &AesKey) -> Vec<u8> {
        let mut body = self.body();
        let mut mic_input = BytesMut::with_capacity(1 + body.len());
        mic_input.put_u8(JOIN_ACCEPT_MHDR);
        mic_input.put_slice(&body);
        body.put_slice(&compute_mic(app_key, &mic_input));
        body.to_vec()
    }

    /// Build the on-air Join-Accept: MHDR followed by the encrypted frame.
    pub fn build(&self, app_key: &AesKey) -> Vec<u8> {
        let encrypted = encrypt_join_accept(app_key, &self.plaintext(app_key));
        let mut frame = BytesMut::with_capacity(1 + encrypted.len());
        frame.put_u8(JOIN_ACCEPT_MHDR);
        frame.put_slice(&encrypted);
        frame.to_vec()
    }
}

/// Join-Accept contents recovered on the device side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedJoinAccept {
    pub join_nonce: [u8; 3],
    pub net_id: [u8; 3],
    pub dev_addr: [u8; 4],
    pub dl_settings: u8,
    pub rx_delay: u8,
}

/// Decrypt a Join-Accept frame the way a device does and verify its MIC.
pub fn open_join_accept(app_key: &AesKey, frame: &[u8]) -> anyhow::Result<DecodedJoinAccept> {
    if frame.len() < 1 + JOIN_ACCEPT_BODY_LEN + MIC_SIZE {
        return Err(anyhow::anyhow!("JoinAccept too short: {} bytes", frame.len()));
    }
    if frame[0] != JOIN_ACCEPT_MHDR {
        return Err(anyhow::anyhow!("not a JoinAccept MHDR: 0x{:02X}", frame[0]));
    }

    let plain = decrypt_join_accept(app_key, &frame[1..]);
    let body = &plain[..JOIN_ACCEPT_BODY_LEN];
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&plain[JOIN_ACCEPT_BODY_LEN..JOIN_ACCEPT_BODY_LEN + MIC_SIZE]);

    let mut mic_input = Vec::with_capacity(1 + body.len());
    mic_input.push(JOIN_ACCEPT_MHDR);
    mic_input.extend_from_slice(body);
    if !verify_mic(app_key, &mic_input, &mic) {
        return Err(anyhow::anyhow!("JoinAccept MIC mismatch"));
    }

    let mut accept = DecodedJoinAccept {
        join_nonce: [0; 3],
        net_id: [0; 3],
        dev_addr: [0; 4],
        dl_settings: body[10],
        rx_delay: body[11],
    };
    accept.join_nonce.copy_from_slice(&body[0..3]);
    accept.net_id.copy_from_slice(&body[3..6]);
    accept.dev_addr.copy_from_slice(&body[6..10]);
    Ok(accept)
}

/// Build a signed Join-Request frame for a device.
pub fn build_join_request(
    app_key: &AesKey,
    join_eui: &Eui64,
    dev_eui: &Eui64,
    dev_nonce: [u8; 2],
) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(JOIN_REQUEST_LEN);
    frame.put_u8(JOIN_REQUEST_MHDR);
    frame.put_slice(join_eui.wire());
    frame.put_slice(dev_eui.wire());
    frame.put_slice(&dev_nonce);
    let mic = compute_mic(app_key, &frame);
    frame.put_slice(&mic);
    frame.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::crypto::aes128_encrypt;
    use crate::lorawan::JoinRequest;

    const APP_KEY: AesKey = [
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F,
        0x3C,
    ];

    fn builder() -> JoinAcceptBuilder {
        JoinAcceptBuilder::new([0xFE, 0xA9, 0xB8], [0x00, 0x00, 0x13], [0x26, 0x0B, 0x12, 0x34])
    }

    #[test]
    fn test_accept_body_layout() {
        let body = builder().body();
        assert_eq!(
            &body[..],
            &[0xFE, 0xA9, 0xB8, 0x00, 0x00, 0x13, 0x26, 0x0B, 0x12, 0x34, 0x00, 0x00]
        );
    }

    #[test]
    fn test_build_join_accept_structure() {
        let frame = builder().build(&APP_KEY);

        // MHDR(1) + one encrypted block(16)
        assert_eq!(frame.len(), 17);
        assert_eq!(frame[0], JOIN_ACCEPT_MHDR);

        let plaintext = builder().plaintext(&APP_KEY);
        assert_eq!(plaintext.len(), 16);
        assert_eq!(aes128_encrypt(&APP_KEY, &frame[1..]), plaintext);
    }

    #[test]
    fn test_open_join_accept_recovers_fields() {
        let frame = builder().build(&APP_KEY);
        let accept = open_join_accept(&APP_KEY, &frame).unwrap();
        assert_eq!(accept.join_nonce, [0xFE, 0xA9, 0xB8]);
        assert_eq!(accept.net_id, [0x00, 0x00, 0x13]);
        assert_eq!(accept.dev_addr, [0x26, 0x0B, 0x12, 0x34]);
        assert_eq!(accept.dl_settings, 0);
        assert_eq!(accept.rx_delay, 0);
    }

    #[test]
    fn test_open_join_accept_wrong_key_fails() {
        let frame = builder().build(&APP_KEY);
        assert!(open_join_accept(&[0u8; 16], &frame).is_err());
    }

    #[test]
    fn test_build_join_request_is_parseable_and_signed() {
        let join_eui = Eui64::from_wire([1, 2, 3, 4, 5, 6, 7, 8]);
        let dev_eui = Eui64::from_wire([0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);
        let frame = build_join_request(&APP_KEY, &join_eui, &dev_eui, [0x42, 0x00]);

        assert_eq!(frame.len(), JOIN_REQUEST_LEN);
        let req = JoinRequest::parse(&frame).unwrap();
        assert_eq!(req.dev_eui, dev_eui);
        assert_eq!(req.join_eui, join_eui);
        assert!(verify_mic(&APP_KEY, &frame[..19], &req.mic));
    }
}
