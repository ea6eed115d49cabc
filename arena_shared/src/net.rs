//! Networking primitives.
//!
//! Wire format: one JSON object per line, `\n`-terminated, UTF-8. The only
//! exception is the handshake, where the client's first line is its bare
//! identity string.
//!
//! - [`NetMsg`] is the tagged message envelope (`{"type": ..., ...}`).
//! - [`LineDecoder`] splits an arbitrary chunked byte stream into lines.
//! - [`LineReader`] / [`LineWriter`] wrap async halves of a connection.

use std::{collections::BTreeMap, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time,
};

use crate::state::{PlayerState, PosUpdate};

/// Longest line accepted before a newline must appear.
pub const MAX_LINE_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetMsg {
    /// Client -> server: position/orientation/colour/health report.
    ///
    /// The payload stays untyped so each field can be validated on its own.
    Pos {
        #[serde(default)]
        payload: Value,
    },
    /// Client -> server: fire at another identity.
    Shoot { target: String },
    /// Client -> server: leaving.
    Bye,
    /// Server -> client: world map, sent once after the handshake.
    Map { payload: MapPayload },
    /// Server -> client: full world snapshot.
    State { payload: StatePayload },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapPayload {
    pub map: Vec<String>,
}

/// Snapshot body: every live identity and the server time it was taken at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatePayload {
    pub players: BTreeMap<String, PlayerState>,
    /// Seconds since the Unix epoch.
    pub t: f64,
}

impl NetMsg {
    /// Builds a full position report from a local state.
    pub fn pos(st: &PlayerState) -> Self {
        NetMsg::Pos {
            payload: serde_json::json!({
                "x": st.x,
                "y": st.y,
                "z": st.z,
                "h": st.h,
                "p": st.p,
                "color": st.color,
                "hp": st.hp,
            }),
        }
    }

    pub fn map(rows: Vec<String>) -> Self {
        NetMsg::Map {
            payload: MapPayload { map: rows },
        }
    }

    pub fn state(players: BTreeMap<String, PlayerState>, t: f64) -> Self {
        NetMsg::State {
            payload: StatePayload { players, t },
        }
    }
}

/// Extracts a [`PosUpdate`] from a `pos` payload.
///
/// Numbers may arrive as JSON numbers or numeric strings. Anything else,
/// including non-finite values, leaves the field unset.
pub fn parse_pos_payload(payload: &Value) -> PosUpdate {
    let field = |k: &str| payload.get(k);
    PosUpdate {
        x: lenient_f64(field("x")),
        y: lenient_f64(field("y")),
        z: lenient_f64(field("z")),
        h: lenient_f64(field("h")),
        p: lenient_f64(field("p")),
        color: field("color").and_then(Value::as_str).map(str::to_owned),
        hp: lenient_int(field("hp")),
    }
}

fn lenient_f64(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn lenient_int(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Current server time in seconds since the Unix epoch.
pub fn unix_time_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Encodes a message as one JSON line including the trailing newline.
pub fn encode_line(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(&payload);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Decodes a single line (without its newline).
pub fn decode_line(line: &str) -> anyhow::Result<NetMsg> {
    serde_json::from_str(line.trim()).context("deserialize msg")
}

/// Incremental newline splitter.
///
/// Bytes are pushed in whatever chunks the transport delivers; complete lines
/// come out in order and the trailing partial line is retained.
#[derive(Debug)]
pub struct LineDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to contain no newline.
    scanned: usize,
    max_len: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_len(MAX_LINE_LEN)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            scanned: 0,
            max_len,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned as a line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete line, stripping `\n` and an optional `\r`.
    ///
    /// Errors once the unterminated tail grows past the maximum line length.
    pub fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        match self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(off) => {
                let end = self.scanned + off;
                let raw = self.buf.split_to(end + 1);
                self.scanned = 0;
                Ok(Some(line_text(&raw[..end])))
            }
            None => {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_len {
                    anyhow::bail!("line exceeds {} bytes", self.max_len);
                }
                Ok(None)
            }
        }
    }

    /// Takes the unterminated tail at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = self.buf.split();
        self.scanned = 0;
        Some(line_text(&raw))
    }
}

fn line_text(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Line-oriented reader over any async byte stream.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    decoder: LineDecoder,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: LineDecoder::new(),
            eof: false,
        }
    }

    /// Returns the next line, or `None` once the peer has closed and the
    /// buffer is drained.
    ///
    /// Cancel-safe: bytes already read stay buffered if the future is dropped.
    pub async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        loop {
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(self.decoder.finish());
            }
            self.decoder.buf.reserve(READ_CHUNK);
            let n = self
                .inner
                .read_buf(&mut self.decoder.buf)
                .await
                .context("tcp read")?;
            if n == 0 {
                self.eof = true;
            }
        }
    }

    /// Like [`next_line`](Self::next_line) with an optional deadline.
    pub async fn next_line_timeout(
        &mut self,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Option<String>> {
        match timeout {
            Some(limit) => time::timeout(limit, self.next_line())
                .await
                .context("read timed out")?,
            None => self.next_line().await,
        }
    }
}

/// Destination for encoded lines. The server stores one per session so the
/// broadcaster can write to it without knowing the transport.
#[async_trait]
pub trait LineSink: Send {
    async fn send_line(&mut self, line: &[u8]) -> anyhow::Result<()>;

    /// Closes the write direction.
    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Line writer over any async byte sink.
#[derive(Debug)]
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let line = encode_line(msg)?;
        self.send_line(&line).await
    }

    /// Sends the handshake line carrying the client's identity.
    pub async fn send_identity(&mut self, identity: &str) -> anyhow::Result<()> {
        let line = format!("{}\n", identity.trim());
        self.send_line(line.as_bytes()).await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> LineSink for LineWriter<W> {
    async fn send_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        self.inner.write_all(line).await.context("tcp write")?;
        self.inner.flush().await.context("tcp flush")?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.inner.shutdown().await.context("tcp shutdown")?;
        Ok(())
    }
}
