//! Device Simulator
//!
//! Plays the end-device side of an OTAA join against the join server's
//! envelope stream. `join` prints a signed Join-Request envelope; `accept`
//! opens the Join-Accept the server sent back and prints the session it
//! establishes.
//!
//! Usage:
//!   device-sim join --dev-eui 70B3D57ED0000001 --dev-nonce 4200 | lora-join-server
//!   device-sim accept --dev-eui 70B3D57ED0000001 --dev-nonce 4200 '<reply line or hex>'

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use lora_join_server::bridge::protocol::{Envelope, LoraFrame};
use lora_join_server::hexfmt::decode_array;
use lora_join_server::lorawan::encoder::{build_join_request, open_join_accept};
use lora_join_server::lorawan::keys::{derive_session_keys, KeyPrefixes};
use lora_join_server::{DeviceIdentity, DeviceRegistry, Eui64};

#[derive(Parser)]
#[command(name = "device-sim")]
#[command(about = "Simulated LoRaWAN end device for OTAA joins")]
struct Cli {
    /// Provisioning file holding the device's AppKey
    #[arg(long, global = true, default_value = "local/lora-keys.txt")]
    keys: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a Join-Request envelope for a provisioned device
    Join {
        /// DevEUI, display order
        #[arg(long)]
        dev_eui: String,
        /// DevNonce as it appears on the wire (4 hex digits)
        #[arg(long)]
        dev_nonce: String,
        /// Gateway identifier
        #[arg(long, default_value = "1357")]
        gw: String,
        /// Radio channel on the gateway
        #[arg(long, default_value = "lora0")]
        device: String,
    },
    /// Decrypt and verify a Join-Accept, then derive the session keys
    Accept {
        /// DevEUI, display order
        #[arg(long)]
        dev_eui: String,
        /// DevNonce sent in the matching Join-Request
        #[arg(long)]
        dev_nonce: String,
        /// Key derivation prefix pair the server runs with
        #[arg(long, value_enum, default_value_t = Prefixes::Lorawan)]
        prefixes: Prefixes,
        /// Reply envelope line, or the bare Join-Accept in hex
        reply: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Prefixes {
    Lorawan,
    ZeroBased,
}

impl From<Prefixes> for KeyPrefixes {
    fn from(p: Prefixes) -> Self {
        match p {
            Prefixes::Lorawan => KeyPrefixes::Lorawan,
            Prefixes::ZeroBased => KeyPrefixes::ZeroBased,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Join {
            dev_eui,
            dev_nonce,
            gw,
            device,
        } => {
            let identity = provisioned(&cli.keys, &dev_eui)?;
            let dev_nonce: [u8; 2] = decode_array(&dev_nonce).context("bad DevNonce")?;

            let payload = build_join_request(&identity.app_key, &identity.join_eui, &identity.dev_eui, dev_nonce);
            eprintln!("Join-Request for {} (JoinEUI {})", identity.dev_eui, identity.join_eui);
            eprintln!("  PHY: {}", hex::encode_upper(&payload));

            let envelope = Envelope::Lora(LoraFrame {
                gw,
                device,
                bus: Some("LoRa".to_string()),
                ts: Some(Utc::now()),
                payload,
            });
            print!("{}", envelope.to_line()?);
        }
        Command::Accept {
            dev_eui,
            dev_nonce,
            prefixes,
            reply,
        } => {
            let identity = provisioned(&cli.keys, &dev_eui)?;
            let dev_nonce: [u8; 2] = decode_array(&dev_nonce).context("bad DevNonce")?;
            let frame = reply_payload(&reply)?;

            let accept = open_join_accept(&identity.app_key, &frame)?;
            let keys = derive_session_keys(
                &identity.app_key,
                &accept.join_nonce,
                &accept.net_id,
                &dev_nonce,
                prefixes.into(),
            );

            println!("Join-Accept for {} verified", identity.dev_eui);
            println!("  JoinNonce: {}", hex::encode_upper(accept.join_nonce));
            println!("  NetID:     {}", hex::encode_upper(accept.net_id));
            println!("  DevAddr:   {}", hex::encode_upper(accept.dev_addr));
            println!("  DLSettings: 0x{:02X}  RxDelay: {}", accept.dl_settings, accept.rx_delay);
            println!("  NwkSKey:   {}", hex::encode_upper(keys.nwk_s_key));
            println!("  AppSKey:   {}", hex::encode_upper(keys.app_s_key));
        }
    }

    Ok(())
}

fn provisioned(keys: &std::path::Path, dev_eui: &str) -> anyhow::Result<DeviceIdentity> {
    let registry = DeviceRegistry::load_file(keys)?;
    let dev_eui = Eui64::from_display_hex(dev_eui)?;
    registry
        .lookup(&dev_eui)
        .cloned()
        .with_context(|| format!("device {} not provisioned in {:?}", dev_eui, keys))
}

/// Accept either a full reply envelope or bare hex.
fn reply_payload(reply: &str) -> anyhow::Result<Vec<u8>> {
    let reply = reply.trim();
    if reply.starts_with('{') {
        match Envelope::parse(reply)? {
            Envelope::Lora(frame) => Ok(frame.payload),
            Envelope::Other => Err(anyhow::anyhow!("reply envelope is not a lora frame")),
        }
    } else {
        hex::decode(reply).context("reply is neither an envelope nor hex")
    }
}
