//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! The editor client and this server exchange `Content-Length: N\r\n\r\n{json}`
//! frames over stdin/stdout. [`FrameReader`] decodes client frames and
//! [`FrameWriter`] encodes replies and notifications.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (32 MiB). Full-sync document changes carry the whole
/// file, so this is generous, but it still bounds a single allocation.
const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Outcome of reading one header line.
enum HeaderLine {
    ContentLength(usize),
    Other,
    End,
}

fn parse_header_line(line: &str) -> Result<HeaderLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(HeaderLine::End);
    }
    let Some((key, value)) = trimmed.split_once(':') else {
        return Ok(HeaderLine::Other);
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(HeaderLine::Other);
    }
    let len = value
        .trim()
        .parse()
        .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))?;
    Ok(HeaderLine::ContentLength(len))
}

/// Decodes JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the client closed the stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_BYTES {
            bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut started = false;

        loop {
            self.line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("reading header line")?;
            if bytes_read == 0 {
                if started {
                    bail!("unexpected EOF while reading headers");
                }
                return Ok(None);
            }
            started = true;

            match parse_header_line(&self.line)? {
                HeaderLine::ContentLength(len) => content_length = Some(len),
                HeaderLine::Other => {}
                HeaderLine::End => break,
            }
        }

        content_length
            .map(Some)
            .context("missing Content-Length header")
    }
}

/// Encodes JSON-RPC frames onto an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
