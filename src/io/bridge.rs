//! Serial sensor bridge
//!
//! A small microcontroller owns the analog spot sensors, the ultrasonic
//! ranger, the card reader, the barrier servo and the panel. The host drives
//! it with request/response frames.
//!
//! Protocol:
//! - Frame: START, CMD, SEQ, LEN, PAYLOAD[LEN], CHECKSUM
//! - START is 0x7E host->bridge, 0x7F bridge->host
//! - SEQ increments per request; the response echoes CMD and SEQ
//! - Checksum: sum all preceding bytes, bitwise NOT
//! - Any response not matching the pending CMD and SEQ is stale and
//!   discarded, including late replies to a request the host gave up on

use crate::domain::types::{Credential, GatePosition, CREDENTIAL_LENGTHS};
use crate::infra::config::Config;
use crate::io::display::DisplayFrame;
use crate::io::hardware::{AnalogInput, CredentialReader, EchoRanger, GateActuator, StatusDisplay};
use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

// Protocol constants
const START_BYTE_COMMAND: u8 = 0x7E;
const START_BYTE_RESPONSE: u8 = 0x7F;
const CMD_READ_ANALOG: u8 = 0x10;
const CMD_PING_ECHO: u8 = 0x20;
const CMD_READ_CARD: u8 = 0x30;
const CMD_SERVO: u8 = 0x40;
const CMD_DISPLAY: u8 = 0x50;

/// START + CMD + SEQ + LEN + CHECKSUM
const FRAME_OVERHEAD: usize = 5;
const LEN_INDEX: usize = 3;
const MAX_PAYLOAD_LEN: usize = 64;

/// Most analog channels one response can carry (two bytes each)
pub const MAX_BRIDGE_CHANNELS: usize = MAX_PAYLOAD_LEN / 2;

/// Analog value the bridge reports for an unplugged channel
const CHANNEL_DISCONNECTED: u16 = 0xFFFF;

/// Build a frame with the given start byte
fn encode_frame(start: u8, cmd: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.push(start);
    frame.push(cmd);
    frame.push(seq);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);

    let sum: u8 = frame.iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
    frame.push(!sum);
    frame
}

/// Sum of a whole frame (including checksum) plus one is zero when valid
fn checksum_valid(frame: &[u8]) -> bool {
    let sum: u8 = frame.iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
    sum.wrapping_add(1) == 0
}

#[derive(Debug, PartialEq, Eq)]
struct ResponseFrame {
    cmd: u8,
    seq: u8,
    payload: Vec<u8>,
}

/// Accumulates bytes across reads; responses can arrive in several chunks
#[derive(Default)]
struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Discard bytes until the buffer starts with a response start byte
    fn synchronize(&mut self) {
        match self.buf.iter().position(|&b| b == START_BYTE_RESPONSE) {
            Some(0) => {}
            Some(start_idx) => {
                debug!(discarded = start_idx, "bridge_sync_discarded_bytes");
                self.buf.advance(start_idx);
            }
            None if !self.buf.is_empty() => {
                debug!(discarded = self.buf.len(), "bridge_sync_no_start_byte");
                self.buf.clear();
            }
            None => {}
        }
    }

    /// Pop the next complete, checksum-valid frame. Leftover bytes stay
    /// buffered for the next call.
    fn next_frame(&mut self) -> Option<ResponseFrame> {
        loop {
            self.synchronize();
            if self.buf.len() <= LEN_INDEX {
                return None;
            }

            let payload_len = self.buf[LEN_INDEX] as usize;
            if payload_len > MAX_PAYLOAD_LEN {
                warn!(len = payload_len, "bridge_invalid_length");
                self.buf.advance(1);
                continue;
            }

            let frame_len = FRAME_OVERHEAD + payload_len;
            if self.buf.len() < frame_len {
                return None;
            }

            let frame = self.buf.split_to(frame_len);
            if !checksum_valid(&frame) {
                let hex_dump: String =
                    frame.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ");
                warn!(raw_bytes = %hex_dump, "bridge_checksum_failed");
                continue;
            }

            return Some(ResponseFrame {
                cmd: frame[1],
                seq: frame[2],
                payload: frame[LEN_INDEX + 1..frame_len - 1].to_vec(),
            });
        }
    }

    /// Pop frames until the response to `cmd`/`seq` turns up, dropping
    /// everything before it
    fn take_response(&mut self, cmd: u8, seq: u8) -> Option<Vec<u8>> {
        while let Some(response) = self.next_frame() {
            if response.cmd == cmd && response.seq == seq {
                return Some(response.payload);
            }
            debug!(
                expected_cmd = cmd,
                expected_seq = seq,
                got_cmd = response.cmd,
                got_seq = response.seq,
                "bridge_stale_response"
            );
        }
        None
    }

    fn clear(&mut self) {
        if !self.buf.is_empty() {
            debug!(discarded = self.buf.len(), "bridge_buffer_cleared");
            self.buf.clear();
        }
    }
}

fn decode_channels(payload: &[u8], count: usize) -> anyhow::Result<Vec<Option<u16>>> {
    if payload.len() != count * 2 {
        bail!("analog response has {} bytes, expected {}", payload.len(), count * 2);
    }
    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .map(|raw| if raw == CHANNEL_DISCONNECTED { None } else { Some(raw) })
        .collect())
}

fn decode_echo(payload: &[u8]) -> anyhow::Result<Option<Duration>> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| anyhow::anyhow!("echo response has {} bytes, expected 4", payload.len()))?;
    let echo_us = u32::from_be_bytes(bytes);
    Ok((echo_us > 0).then(|| Duration::from_micros(echo_us as u64)))
}

fn decode_card(payload: &[u8]) -> anyhow::Result<Option<Credential>> {
    if payload.is_empty() {
        return Ok(None);
    }
    if !CREDENTIAL_LENGTHS.contains(&payload.len()) {
        bail!("card response has {} bytes, not a valid UID length", payload.len());
    }
    Ok(Some(Credential::from_bytes(payload)))
}

fn encode_display(frame: &DisplayFrame) -> Vec<u8> {
    let mut payload = Vec::with_capacity(MAX_PAYLOAD_LEN);
    payload.push(frame.bar_width.min(u8::MAX as u32) as u8);
    let text = frame.lines().join("\n");
    let room = MAX_PAYLOAD_LEN - payload.len();
    payload.extend(text.bytes().take(room));
    payload
}

struct BridgeLink {
    port: tokio_serial::SerialStream,
    buffer: FrameBuffer,
    seq: u8,
}

impl BridgeLink {
    /// Send one command and wait for its response. Cancelling this future
    /// leaves any late reply in the buffer; the next call discards it.
    async fn transact(&mut self, cmd: u8, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        self.buffer.clear();

        let frame = encode_frame(START_BYTE_COMMAND, cmd, seq, payload);
        self.port.write_all(&frame).await.context("bridge write failed")?;

        let mut temp_buf = [0u8; 64];
        loop {
            if let Some(response) = self.buffer.take_response(cmd, seq) {
                return Ok(response);
            }

            match self.port.read(&mut temp_buf).await {
                Ok(0) => bail!("bridge port closed"),
                Ok(n) => self.buffer.extend(&temp_buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(e).context("bridge read failed"),
            }
        }
    }
}

/// Cloneable handle to the sensor bridge; every peripheral shares one link
#[derive(Clone)]
pub struct SerialBridge {
    link: Arc<Mutex<BridgeLink>>,
    io_timeout: Duration,
    open_angle: u8,
    closed_angle: u8,
}

impl SerialBridge {
    /// Open the serial link. Failure here is fatal: a gate that cannot be
    /// commanded must not start.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let port = tokio_serial::new(config.hardware_device(), config.hardware_baud())
            .timeout(Duration::from_millis(50))
            .open_native_async()
            .with_context(|| format!("Failed to open bridge port {}", config.hardware_device()))?;

        info!(device = %config.hardware_device(), baud = %config.hardware_baud(), "bridge_port_opened");

        Ok(Self {
            link: Arc::new(Mutex::new(BridgeLink { port, buffer: FrameBuffer::default(), seq: 0 })),
            io_timeout: config.io_timeout(),
            open_angle: config.open_angle(),
            closed_angle: config.closed_angle(),
        })
    }

    async fn transact(&self, cmd: u8, payload: &[u8], budget: Duration) -> anyhow::Result<Vec<u8>> {
        let mut link = self.link.lock().await;
        let response = tokio::time::timeout(budget, link.transact(cmd, payload))
            .await
            .with_context(|| format!("bridge command 0x{:02X} timed out", cmd))??;
        trace!(cmd = cmd, len = response.len(), "bridge_response");
        Ok(response)
    }
}

#[async_trait]
impl AnalogInput for SerialBridge {
    async fn read_channels(&mut self, count: usize) -> anyhow::Result<Vec<Option<u16>>> {
        if count > MAX_BRIDGE_CHANNELS {
            bail!("bridge carries at most {} channels, asked for {}", MAX_BRIDGE_CHANNELS, count);
        }
        let payload = self.transact(CMD_READ_ANALOG, &[count as u8], self.io_timeout).await?;
        decode_channels(&payload, count)
    }
}

#[async_trait]
impl EchoRanger for SerialBridge {
    async fn ping(&mut self, max_wait: Duration) -> anyhow::Result<Option<Duration>> {
        let wait_ms = (max_wait.as_millis() as u16).to_be_bytes();
        let payload = self.transact(CMD_PING_ECHO, &wait_ms, self.io_timeout + max_wait).await?;
        decode_echo(&payload)
    }
}

#[async_trait]
impl CredentialReader for SerialBridge {
    async fn poll_credential(&mut self) -> anyhow::Result<Option<Credential>> {
        let payload = self.transact(CMD_READ_CARD, &[], self.io_timeout).await?;
        decode_card(&payload)
    }
}

#[async_trait]
impl GateActuator for SerialBridge {
    async fn command(&mut self, position: GatePosition) -> anyhow::Result<()> {
        let angle = match position {
            GatePosition::Open => self.open_angle,
            GatePosition::Closed => self.closed_angle,
        };
        self.transact(CMD_SERVO, &[angle], self.io_timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusDisplay for SerialBridge {
    async fn render(&mut self, frame: &DisplayFrame) -> anyhow::Result<()> {
        self.transact(CMD_DISPLAY, &encode_display(frame), self.io_timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(cmd: u8, payload: &[u8]) -> Vec<u8> {
        encode_frame(START_BYTE_RESPONSE, cmd, 1, payload)
    }

    #[test]
    fn test_encode_frame_checksum() {
        let frame = encode_frame(START_BYTE_COMMAND, CMD_SERVO, 7, &[90]);
        assert_eq!(frame.len(), 6);
        assert_eq!(frame[0], 0x7E);
        assert_eq!(frame[1], CMD_SERVO);
        assert_eq!(frame[2], 7);
        assert_eq!(frame[3], 1);
        assert_eq!(frame[4], 90);
        assert!(checksum_valid(&frame));
    }

    #[test]
    fn test_late_reply_to_abandoned_request_is_skipped() {
        // A reply to request 4 arrives after the host timed out and sent request 5
        let mut buffer = FrameBuffer::default();
        buffer.extend(&encode_frame(START_BYTE_RESPONSE, CMD_READ_ANALOG, 4, &[0x03, 0x84]));
        buffer.extend(&encode_frame(START_BYTE_RESPONSE, CMD_READ_ANALOG, 5, &[0x00, 0x64]));

        assert_eq!(buffer.take_response(CMD_READ_ANALOG, 5), Some(vec![0x00, 0x64]));
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn test_late_reply_alone_is_not_accepted() {
        let mut buffer = FrameBuffer::default();
        buffer.extend(&encode_frame(START_BYTE_RESPONSE, CMD_PING_ECHO, 9, &[0, 0, 0x02, 0x0D]));

        assert_eq!(buffer.take_response(CMD_PING_ECHO, 10), None);
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn test_widest_analog_response_fits_frame() {
        let payload = vec![0x01; MAX_BRIDGE_CHANNELS * 2];
        let mut buffer = FrameBuffer::default();
        buffer.extend(&encode_frame(START_BYTE_RESPONSE, CMD_READ_ANALOG, 3, &payload));

        let body = buffer.take_response(CMD_READ_ANALOG, 3).unwrap();
        assert_eq!(decode_channels(&body, MAX_BRIDGE_CHANNELS).unwrap().len(), MAX_BRIDGE_CHANNELS);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let bytes = response(CMD_READ_ANALOG, &[0x02, 0x58, 0x00, 0x64]);
        let mut buffer = FrameBuffer::default();

        buffer.extend(&bytes[..3]);
        assert_eq!(buffer.next_frame(), None);

        buffer.extend(&bytes[3..]);
        let frame = buffer.next_frame().unwrap();
        assert_eq!(frame.cmd, CMD_READ_ANALOG);
        assert_eq!(frame.payload, vec![0x02, 0x58, 0x00, 0x64]);
    }

    #[test]
    fn test_garbage_before_start_byte_discarded() {
        let mut bytes = vec![0x00, 0x13, 0x7E];
        bytes.extend(response(CMD_READ_CARD, &[]));
        let mut buffer = FrameBuffer::default();
        buffer.extend(&bytes);

        let frame = buffer.next_frame().unwrap();
        assert_eq!(frame.cmd, CMD_READ_CARD);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_corrupt_frame_skipped() {
        let mut corrupt = response(CMD_SERVO, &[]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let good = response(CMD_DISPLAY, &[]);

        let mut buffer = FrameBuffer::default();
        buffer.extend(&corrupt);
        buffer.extend(&good);

        assert_eq!(buffer.next_frame().unwrap().cmd, CMD_DISPLAY);
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn test_decode_channels() {
        let payload = [0x02, 0x58, 0xFF, 0xFF, 0x01, 0xF4];
        let channels = decode_channels(&payload, 3).unwrap();
        assert_eq!(channels, vec![Some(600), None, Some(500)]);
        assert!(decode_channels(&payload, 2).is_err());
    }

    #[test]
    fn test_decode_echo() {
        assert_eq!(decode_echo(&[0, 0, 0, 0]).unwrap(), None);
        assert_eq!(
            decode_echo(&[0, 0, 0x02, 0x0D]).unwrap(),
            Some(Duration::from_micros(525))
        );
        assert!(decode_echo(&[0, 1]).is_err());
    }

    #[test]
    fn test_decode_card() {
        assert_eq!(decode_card(&[]).unwrap(), None);
        let card = decode_card(&[0x03, 0x0C, 0x49, 0x16]).unwrap().unwrap();
        assert_eq!(card.to_hex(), "03:0C:49:16");
        assert!(decode_card(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_display_payload_fits_frame() {
        let frame = DisplayFrame {
            prompt: "Insert ID",
            available: 1,
            total: 3,
            free: [false, true, false].into_iter().collect(),
            bar_width: 42,
        };
        let payload = encode_display(&frame);
        assert!(payload.len() <= MAX_PAYLOAD_LEN);
        assert_eq!(payload[0], 42);
        assert!(payload[1..].starts_with(b"Insert ID\nAvailable: 1"));
    }
}
