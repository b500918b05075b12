//! Base64 armor for whole packages.
//!
//! Armor wraps the entire package stream, preamble included, in standard
//! Base64. The `base64` crate's io adapters are blocking-only, so the 3-in /
//! 4-out group alignment lives here, shared by the sync and async pipelines;
//! the crate engine does the actual radix work on whole groups.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use coffre_core::{CoffreError, CoffreResult};

/// Bytes of raw input per encoded group.
const GROUP_IN: usize = 3;
/// Characters per encoded group.
const GROUP_OUT: usize = 4;

/// Incremental Base64 encoder. Push bytes with [`update`](Self::update), then
/// [`finish`](Self::finish) to flush the padded final group.
#[derive(Default)]
pub struct ArmorEncoder {
    carry: Vec<u8>,
}

impl ArmorEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.carry.is_empty() {
            let take = (GROUP_IN - self.carry.len()).min(input.len());
            self.carry.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.carry.len() == GROUP_IN {
                out.extend_from_slice(STANDARD.encode(&self.carry).as_bytes());
                self.carry.clear();
            }
        }
        let full = input.len() - input.len() % GROUP_IN;
        if full > 0 {
            out.extend_from_slice(STANDARD.encode(&input[..full]).as_bytes());
        }
        self.carry.extend_from_slice(&input[full..]);
    }

    pub fn finish(self, out: &mut Vec<u8>) {
        if !self.carry.is_empty() {
            out.extend_from_slice(STANDARD.encode(&self.carry).as_bytes());
        }
    }
}

/// Incremental Base64 decoder, the inverse of [`ArmorEncoder`].
#[derive(Default)]
pub struct ArmorDecoder {
    carry: Vec<u8>,
}

impl ArmorDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> CoffreResult<()> {
        if !self.carry.is_empty() {
            let take = (GROUP_OUT - self.carry.len()).min(input.len());
            self.carry.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.carry.len() == GROUP_OUT {
                decode_groups(&self.carry, out)?;
                self.carry.clear();
            }
        }
        let full = input.len() - input.len() % GROUP_OUT;
        if full > 0 {
            decode_groups(&input[..full], out)?;
        }
        self.carry.extend_from_slice(&input[full..]);
        Ok(())
    }

    /// Fails if the stream ended inside a group.
    pub fn finish(self) -> CoffreResult<()> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            Err(CoffreError::invalid_package(
                "base64 armor",
                "stream ends inside a base64 group",
            ))
        }
    }
}

fn decode_groups(groups: &[u8], out: &mut Vec<u8>) -> CoffreResult<()> {
    STANDARD
        .decode_vec(groups, out)
        .map_err(|e| CoffreError::invalid_package("base64 armor", e.to_string()))
}

fn to_io(e: CoffreError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Blocking reader that de-armors a Base64 stream on the fly. Decode failures
/// surface as `InvalidData` I/O errors, which the package parser reports as
/// malformed input.
pub struct ArmorReader<R: Read> {
    src: R,
    decoder: Option<ArmorDecoder>,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: Read> ArmorReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            decoder: Some(ArmorDecoder::new()),
            decoded: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: Read> Read for ArmorReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.decoded.len() {
                let n = (self.decoded.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(0);
            };
            let mut raw = [0u8; 4096];
            let n = self.src.read(&mut raw)?;
            if n == 0 {
                if let Some(decoder) = self.decoder.take() {
                    decoder.finish().map_err(to_io)?;
                }
                return Ok(0);
            }
            self.decoded.clear();
            self.pos = 0;
            decoder.update(&raw[..n], &mut self.decoded).map_err(to_io)?;
            // Fewer than four new chars decode to nothing; read again.
        }
    }
}

/// [`ArmorReader`], for the async pipelines.
pub struct AsyncArmorReader<R> {
    src: R,
    decoder: Option<ArmorDecoder>,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: AsyncRead + Unpin> AsyncArmorReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            decoder: Some(ArmorDecoder::new()),
            decoded: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for AsyncArmorReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            if this.pos < this.decoded.len() {
                let n = (this.decoded.len() - this.pos).min(out.remaining());
                out.put_slice(&this.decoded[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(Ok(()));
            };
            let mut raw = [0u8; 4096];
            let mut raw_buf = ReadBuf::new(&mut raw);
            match Pin::new(&mut this.src).poll_read(cx, &mut raw_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {}
            }
            let filled = raw_buf.filled();
            if filled.is_empty() {
                if let Some(decoder) = this.decoder.take() {
                    if let Err(e) = decoder.finish() {
                        return Poll::Ready(Err(to_io(e)));
                    }
                }
                return Poll::Ready(Ok(()));
            }
            this.decoded.clear();
            this.pos = 0;
            if let Err(e) = decoder.update(filled, &mut this.decoded) {
                return Poll::Ready(Err(to_io(e)));
            }
        }
    }
}
