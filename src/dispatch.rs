//! Frame dispatch
//!
//! Classifies a raw frame by its MHDR and routes it: Join-Requests run the
//! join procedure, data frames go to a [`DataFrameHandler`], everything else
//! is dropped. Every failure becomes "no reply" here.

use tracing::{debug, info, warn};

use crate::error::{JoinError, Result};
use crate::join::JoinServer;
use crate::lorawan::{self, Major, MType};

/// What to send back for a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Transmit this frame on the channel the request came in on
    Reply(Vec<u8>),
    /// Nothing to send
    NoReply,
}

/// Collaborator for data frames. Payload decryption is out of scope for
/// the join server; implementations decide what to do with the frame.
pub trait DataFrameHandler: Send + Sync {
    fn on_data(&self, frame: &[u8], uplink: bool, ack: bool);
}

/// Decodes data-frame headers and logs them.
#[derive(Debug, Default)]
pub struct LogDataFrames;

impl DataFrameHandler for LogDataFrames {
    fn on_data(&self, frame: &[u8], uplink: bool, ack: bool) {
        let Ok(mhdr) = lorawan::classify(frame) else {
            return;
        };
        match lorawan::decode_data_frame(mhdr.mtype, frame) {
            Ok(data) => info!("LoRa data uplink={} ack={}: {}", uplink, ack, data),
            Err(e) => warn!("LoRa data uplink={} ack={}: undecodable frame: {}", uplink, ack, e),
        }
    }
}

/// Route one frame. Errors say why it was dropped.
pub fn dispatch(server: &JoinServer, data: &dyn DataFrameHandler, frame: &[u8]) -> Result<Outcome> {
    let mhdr = lorawan::classify(frame)?;
    debug!("LoRa frame type {} ({}) version {}", mhdr.frame_type, mhdr.mtype, mhdr.major.bits());

    if let Major::Unknown(v) = mhdr.major {
        return Err(JoinError::UnsupportedVersion(v));
    }

    match mhdr.mtype {
        MType::JoinRequest => server.join(frame).map(|accept| Outcome::Reply(accept.frame)),
        MType::JoinAccept => {
            info!("Ignoring JoinAccept frame");
            Ok(Outcome::NoReply)
        }
        MType::UnconfirmedDataUp
        | MType::UnconfirmedDataDown
        | MType::ConfirmedDataUp
        | MType::ConfirmedDataDown => {
            if let Some((uplink, ack)) = mhdr.mtype.data_direction() {
                data.on_data(frame, uplink, ack);
            }
            Ok(Outcome::NoReply)
        }
        MType::Rfu | MType::Proprietary => Err(JoinError::UnknownFrameType(mhdr.frame_type)),
    }
}

/// [`dispatch`] with the error policy applied: log and answer nothing.
pub fn handle_frame(server: &JoinServer, data: &dyn DataFrameHandler, frame: &[u8]) -> Outcome {
    match dispatch(server, data, frame) {
        Ok(outcome) => outcome,
        Err(e) if e.is_expected() => {
            debug!("Dropping frame: {}", e);
            Outcome::NoReply
        }
        Err(e) => {
            warn!("Dropping frame: {}", e);
            Outcome::NoReply
        }
    }
}
