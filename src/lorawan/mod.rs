pub mod crypto;
pub mod encoder;
pub mod keys;

use std::fmt;

use bytes::Buf;

use crate::error::{JoinError, Result};
use crate::registry::Eui64;

/// Join-Request length: MHDR(1) + JoinEUI(8) + DevEUI(8) + DevNonce(2) + MIC(4)
pub const JOIN_REQUEST_LEN: usize = 23;

/// Bytes covered by the Join-Request MIC (everything before it)
pub const JOIN_REQUEST_MIC_OFFSET: usize = 19;

/// LoRaWAN MAC Header (MHDR) - Message Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    Rfu,
    Proprietary,
}

impl MType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0b000 => MType::JoinRequest,
            0b001 => MType::JoinAccept,
            0b010 => MType::UnconfirmedDataUp,
            0b011 => MType::UnconfirmedDataDown,
            0b100 => MType::ConfirmedDataUp,
            0b101 => MType::ConfirmedDataDown,
            0b110 => MType::Rfu,
            _ => MType::Proprietary,
        }
    }

    /// (uplink, ack requested) for the four data frame types
    pub fn data_direction(self) -> Option<(bool, bool)> {
        match self {
            MType::UnconfirmedDataUp => Some((true, false)),
            MType::UnconfirmedDataDown => Some((false, false)),
            MType::ConfirmedDataUp => Some((true, true)),
            MType::ConfirmedDataDown => Some((false, true)),
            _ => None,
        }
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MType::JoinRequest => write!(f, "JoinRequest"),
            MType::JoinAccept => write!(f, "JoinAccept"),
            MType::UnconfirmedDataUp => write!(f, "UnconfirmedDataUp"),
            MType::UnconfirmedDataDown => write!(f, "UnconfirmedDataDown"),
            MType::ConfirmedDataUp => write!(f, "ConfirmedDataUp"),
            MType::ConfirmedDataDown => write!(f, "ConfirmedDataDown"),
            MType::Rfu => write!(f, "RFU"),
            MType::Proprietary => write!(f, "Proprietary"),
        }
    }
}

/// LoRaWAN Major version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Major {
    LoRaWANR1,
    Unknown(u8),
}

impl Major {
    pub fn bits(self) -> u8 {
        match self {
            Major::LoRaWANR1 => 0,
            Major::Unknown(v) => v,
        }
    }
}

/// Classified MAC header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub raw: u8,
    /// Top three bits
    pub frame_type: u8,
    pub mtype: MType,
    pub major: Major,
}

impl Mhdr {
    pub fn parse(raw: u8) -> Self {
        let frame_type = raw >> 5;
        let major = match raw & 0x03 {
            0 => Major::LoRaWANR1,
            v => Major::Unknown(v),
        };
        Self {
            raw,
            frame_type,
            mtype: MType::from_bits(frame_type),
            major,
        }
    }
}

/// Classify a raw PHY payload by its MHDR. Unknown types and versions are
/// returned as-is; only an empty frame fails.
pub fn classify(data: &[u8]) -> Result<Mhdr> {
    data.first().map(|b| Mhdr::parse(*b)).ok_or(JoinError::MalformedFrame)
}

/// Frame Control byte (FCtrl)
#[derive(Debug, Clone)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub class_b: bool,
    pub f_opts_len: u8,
}

/// Join-Request fields, all kept in on-wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub mhdr: u8,
    pub join_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: [u8; 2],
    pub mic: [u8; 4],
}

impl JoinRequest {
    /// Slice a 23-byte Join-Request. Any other length is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != JOIN_REQUEST_LEN {
            return Err(JoinError::MalformedJoinRequest { len: data.len() });
        }

        let mut buf = data;
        let mhdr = buf.get_u8();
        let mut join_eui = [0u8; 8];
        buf.copy_to_slice(&mut join_eui);
        let mut dev_eui = [0u8; 8];
        buf.copy_to_slice(&mut dev_eui);
        let mut dev_nonce = [0u8; 2];
        buf.copy_to_slice(&mut dev_nonce);
        let mut mic = [0u8; 4];
        buf.copy_to_slice(&mut mic);

        Ok(Self {
            mhdr,
            join_eui: Eui64::from_wire(join_eui),
            dev_eui: Eui64::from_wire(dev_eui),
            dev_nonce,
            mic,
        })
    }
}

impl fmt::Display for JoinRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JoinRequest JoinEUI={} DevEUI={} DevNonce={} MIC={}",
            self.join_eui,
            self.dev_eui,
            hex::encode_upper(self.dev_nonce),
            hex::encode_upper(self.mic)
        )
    }
}

/// Data frame metadata. The FRMPayload stays encrypted.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub mtype: MType,
    pub dev_addr: u32,
    pub fctrl: FCtrl,
    pub fcnt: u16,
    pub f_opts: Vec<u8>,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8>,
    pub mic: u32,
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} DevAddr={:08X} FCnt={} FPort={} Payload={} bytes MIC={:08X} ADR={} ACK={}",
            self.mtype,
            self.dev_addr,
            self.fcnt,
            self.f_port.map(|p| p.to_string()).unwrap_or("-".to_string()),
            self.frm_payload.len(),
            self.mic,
            self.fctrl.adr,
            self.fctrl.ack,
        )
    }
}

/// Decode the header fields of a data frame (up or down).
pub fn decode_data_frame(mtype: MType, data: &[u8]) -> anyhow::Result<DataFrame> {
    // Minimum: MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2) + MIC(4) = 12 bytes
    if data.len() < 12 {
        return Err(anyhow::anyhow!(
            "Data frame too short: {} bytes (minimum 12)",
            data.len()
        ));
    }

    let mut buf = &data[1..];

    // DevAddr is little-endian
    let dev_addr = buf.get_u32_le();

    let fctrl_byte = buf.get_u8();
    let fctrl = FCtrl {
        adr: (fctrl_byte & 0x80) != 0,
        adr_ack_req: (fctrl_byte & 0x40) != 0,
        ack: (fctrl_byte & 0x20) != 0,
        class_b: (fctrl_byte & 0x10) != 0,
        f_opts_len: fctrl_byte & 0x0F,
    };

    let fcnt = buf.get_u16_le();

    let f_opts_end = 8 + fctrl.f_opts_len as usize;
    let mic_start = data.len() - 4;
    if f_opts_end > mic_start {
        return Err(anyhow::anyhow!(
            "FOpts length {} exceeds available data",
            fctrl.f_opts_len
        ));
    }
    let f_opts = data[8..f_opts_end].to_vec();

    // FPort + FRMPayload only when bytes remain between FOpts and MIC
    let (f_port, frm_payload) = if f_opts_end < mic_start {
        (Some(data[f_opts_end]), data[f_opts_end + 1..mic_start].to_vec())
    } else {
        (None, vec![])
    };

    let mic = (&data[mic_start..]).get_u32_le();

    Ok(DataFrame {
        mtype,
        dev_addr,
        fctrl,
        fcnt,
        f_opts,
        f_port,
        frm_payload,
        mic,
    })
}
