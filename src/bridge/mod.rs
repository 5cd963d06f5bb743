pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::dispatch::{handle_frame, DataFrameHandler, Outcome};
use crate::join::JoinServer;
use protocol::{Envelope, LoraFrame};

/// Counters for one bridge run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames: u64,
    pub replies: u64,
    pub ignored: u64,
    pub invalid: u64,
}

/// Run the envelope bridge until the reader hits EOF.
///
/// Envelopes are handled one at a time, in arrival order. Each reply is held
/// back for `accept_delay` (the RX1 join window) before it is written.
pub async fn run_bridge<R, W>(
    server: Arc<JoinServer>,
    data: Arc<dyn DataFrameHandler>,
    mut reader: R,
    mut writer: W,
    accept_delay: Duration,
) -> anyhow::Result<BridgeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = BridgeStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("Invalid envelope: {}", e);
                debug!("  Raw line: {}", hex::encode_upper(&buf));
                stats.invalid += 1;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let frame = match Envelope::parse(line) {
            Ok(Envelope::Lora(frame)) => frame,
            Ok(Envelope::Other) => {
                debug!("Skipping non-LoRa envelope");
                stats.ignored += 1;
                continue;
            }
            Err(e) => {
                warn!("{}", e);
                debug!("  Raw line: {}", line);
                stats.invalid += 1;
                continue;
            }
        };

        stats.frames += 1;
        debug!(
            "lora frame from gw {} device {}: {}",
            frame.gw,
            frame.device,
            hex::encode_upper(&frame.payload)
        );

        let Some(reply) = handle_lora(&server, &data, frame).await? else {
            continue;
        };

        if !accept_delay.is_zero() {
            tokio::time::sleep(accept_delay).await;
        }

        info!("Reply to gw {} device {}: {}", reply.gw, reply.device, hex::encode_upper(&reply.payload));
        writer.write_all(Envelope::Lora(reply).to_line()?.as_bytes()).await?;
        writer.flush().await?;
        stats.replies += 1;
    }

    info!(
        "Envelope stream closed: {} frames, {} replies, {} ignored, {} invalid",
        stats.frames, stats.replies, stats.ignored, stats.invalid
    );
    Ok(stats)
}

/// Dispatch one frame off the async runtime (a join appends to the session log).
async fn handle_lora(
    server: &Arc<JoinServer>,
    data: &Arc<dyn DataFrameHandler>,
    frame: LoraFrame,
) -> anyhow::Result<Option<LoraFrame>> {
    let server = server.clone();
    let data = data.clone();
    let payload = frame.payload.clone();

    let outcome = tokio::task::spawn_blocking(move || handle_frame(&server, data.as_ref(), &payload)).await?;

    Ok(match outcome {
        Outcome::Reply(bytes) => Some(frame.reply(bytes)),
        Outcome::NoReply => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LogDataFrames;
    use crate::join::tests::{join_request, server, APP_KEY};
    use crate::lorawan::encoder::open_join_accept;
    use tokio::io::BufReader;

    fn lora_line(payload: &[u8]) -> String {
        format!(
            "{{\"op\":\"lora\",\"gw\":\"1357\",\"bus\":\"LoRa\",\"device\":\"lora0\",\"ts\":1727183838,\"payload\":\"{}\"}}\n",
            hex::encode(payload)
        )
    }

    #[tokio::test]
    async fn test_bridge_replies_to_join_request() {
        let input = format!(
            "{}{}",
            "{\"op\":\"startup\",\"gw\":\"1357\"}\n",
            lora_line(&join_request([0x42, 0x00]))
        );
        let reader = tokio_test::io::Builder::new().read(input.as_bytes()).build();
        let mut output = Vec::new();

        let stats = run_bridge(
            Arc::new(server()),
            Arc::new(LogDataFrames),
            BufReader::new(reader),
            &mut output,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.replies, 1);
        assert_eq!(stats.ignored, 1);

        let text = String::from_utf8(output).unwrap();
        let mut lines = text.lines();
        let reply = match Envelope::parse(lines.next().unwrap()).unwrap() {
            Envelope::Lora(frame) => frame,
            other => panic!("Expected lora reply, got {:?}", other),
        };
        assert!(lines.next().is_none());
        assert_eq!(reply.gw, "1357");
        assert_eq!(reply.device, "lora0");
        assert_eq!(reply.payload[0], 0x20);

        let accept = open_join_accept(&APP_KEY, &reply.payload).unwrap();
        assert_eq!(accept.dev_addr, [0x26, 0x0B, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_bridge_survives_non_utf8_line() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(lora_line(&join_request([0x44, 0x00])).as_bytes());
        let reader = tokio_test::io::Builder::new().read(&input).build();
        let mut output = Vec::new();

        let stats = run_bridge(
            Arc::new(server()),
            Arc::new(LogDataFrames),
            BufReader::new(reader),
            &mut output,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.replies, 1);
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_bridge_drops_bad_input_without_stopping() {
        let mut forged = join_request([0x42, 0x00]);
        forged[20] ^= 0x01;

        let input = format!(
            "not json\n\n{}{}{}",
            lora_line(&forged),
            lora_line(&[0x40, 0x34, 0x12, 0x0B, 0x26, 0x80, 0x42, 0x00, 0x01, 0x00, 0xE1, 0x78, 0x56, 0x34, 0x12]),
            lora_line(&join_request([0x43, 0x00])),
        );
        let reader = tokio_test::io::Builder::new().read(input.as_bytes()).build();
        let mut output = Vec::new();

        let stats = run_bridge(
            Arc::new(server()),
            Arc::new(LogDataFrames),
            BufReader::new(reader),
            &mut output,
            Duration::from_millis(5),
        )
        .await
        .unwrap();

        assert_eq!(
            stats,
            BridgeStats {
                frames: 3,
                replies: 1,
                ignored: 0,
                invalid: 1,
            }
        );
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 1);
    }
}
