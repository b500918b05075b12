//! Package wire primitives.
//!
//! Every preamble field of a crypto package is length-prefixed:
//!
//! ```text
//! [len: i32 LE][payload: len bytes]
//! ```
//!
//! The prefix is a *signed* 32-bit little-endian integer; a negative or
//! oversized value means the bytes are not a package (or not ours) and reading
//! fails before any allocation of the claimed size. The final ciphertext field
//! of a package carries no prefix and runs to end of stream, so it never
//! passes through here.

use std::io::{self, Read, Seek, SeekFrom, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoffreError, CoffreResult};

/// Upper bound on a single prefixed field (wrapped keys, IVs, tags, chunks).
pub const MAX_FIELD_LEN: usize = 1 << 20;

/// Location of a zero-filled reservation inside an already written stream,
/// to be overwritten once the value (an integrity tag) is known.
#[derive(Debug, Clone, Copy)]
pub struct TagSlot {
    /// Absolute stream offset of the reserved payload (after its prefix).
    pub offset: u64,
    pub len: usize,
}

pub fn write_field<W: Write>(w: &mut W, payload: &[u8]) -> CoffreResult<()> {
    w.write_all(&(payload.len() as i32).to_le_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads one length prefix and validates it. `context` names the field being
/// read, for error reporting.
pub fn read_len<R: Read>(r: &mut R, context: &'static str) -> CoffreResult<usize> {
    let mut prefix = [0u8; 4];
    r.read_exact(&mut prefix)
        .map_err(|e| read_error(e, context))?;
    checked_len(i32::from_le_bytes(prefix), context)
}

pub fn read_field<R: Read>(r: &mut R, context: &'static str) -> CoffreResult<Vec<u8>> {
    let len = read_len(r, context)?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .map_err(|e| read_error(e, context))?;
    Ok(payload)
}

/// Appends a length prefix plus `len` zero bytes to `buf` and returns the
/// offset of the zeros within `buf`.
pub fn reserve_field_buf(buf: &mut Vec<u8>, len: usize) -> usize {
    buf.extend_from_slice(&(len as i32).to_le_bytes());
    let offset = buf.len();
    buf.resize(offset + len, 0);
    offset
}

/// Overwrites a reservation in place, then restores the write position to
/// where it was. The payload must fill the reservation exactly; a mismatch is
/// a defect in the calling pipeline, not bad input.
pub fn patch_field<W: Write + Seek>(w: &mut W, slot: TagSlot, payload: &[u8]) -> CoffreResult<()> {
    assert_eq!(payload.len(), slot.len, "tag must fill its reservation");
    let end = w.stream_position()?;
    w.seek(SeekFrom::Start(slot.offset))?;
    w.write_all(payload)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(())
}

pub async fn write_field_async<W>(w: &mut W, payload: &[u8]) -> CoffreResult<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&(payload.len() as i32).to_le_bytes()).await?;
    w.write_all(payload).await?;
    Ok(())
}

pub async fn read_len_async<R>(r: &mut R, context: &'static str) -> CoffreResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    r.read_exact(&mut prefix)
        .await
        .map_err(|e| read_error(e, context))?;
    checked_len(i32::from_le_bytes(prefix), context)
}

pub async fn read_field_async<R>(r: &mut R, context: &'static str) -> CoffreResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_len_async(r, context).await?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| read_error(e, context))?;
    Ok(payload)
}

pub async fn patch_field_async<W>(w: &mut W, slot: TagSlot, payload: &[u8]) -> CoffreResult<()>
where
    W: AsyncWrite + AsyncSeek + Unpin,
{
    assert_eq!(payload.len(), slot.len, "tag must fill its reservation");
    let end = w.stream_position().await?;
    w.seek(SeekFrom::Start(slot.offset)).await?;
    w.write_all(payload).await?;
    w.seek(SeekFrom::Start(end)).await?;
    Ok(())
}

/// Maps an I/O error seen while parsing a package into the taxonomy: EOF in
/// the middle of a field and decode failures are malformed input, everything
/// else stays an I/O error.
pub fn read_error(e: io::Error, context: &'static str) -> CoffreError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            CoffreError::invalid_package(context, "stream ended mid-field")
        }
        io::ErrorKind::InvalidData => CoffreError::invalid_package(context, e.to_string()),
        _ => CoffreError::Io(e),
    }
}

fn checked_len(len: i32, context: &'static str) -> CoffreResult<usize> {
    if len < 0 {
        return Err(CoffreError::invalid_package(
            context,
            format!("negative field length {len}"),
        ));
    }
    let len = len as usize;
    if len > MAX_FIELD_LEN {
        return Err(CoffreError::invalid_package(
            context,
            format!("field length {len} exceeds the {MAX_FIELD_LEN}-byte limit"),
        ));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_field_roundtrip() {
        let mut buf = Vec::new();
        write_field(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &5i32.to_le_bytes());
        assert_eq!(&buf[4..], b"hello");

        let mut r = Cursor::new(buf);
        assert_eq!(read_field(&mut r, "test field").unwrap(), b"hello");
    }

    #[test]
    fn test_empty_field() {
        let mut buf = Vec::new();
        write_field(&mut buf, b"").unwrap();
        assert_eq!(buf, 0i32.to_le_bytes());

        let mut r = Cursor::new(buf);
        assert_eq!(read_field(&mut r, "test field").unwrap(), b"");
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut r = Cursor::new((-1i32).to_le_bytes().to_vec());
        let err = read_field(&mut r, "test field").unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut r = Cursor::new(((MAX_FIELD_LEN as i32) + 1).to_le_bytes().to_vec());
        let err = read_field(&mut r, "test field").unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut buf = 10i32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"shrt");
        let err = read_field(&mut Cursor::new(buf), "test field").unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_truncated_prefix_rejected() {
        let err = read_field(&mut Cursor::new(vec![1u8, 0]), "test field").unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_reserve_and_patch() {
        let mut pre = Vec::new();
        pre.extend_from_slice(b"hdr");
        let rel = reserve_field_buf(&mut pre, 4);
        assert_eq!(rel, 3 + 4);
        assert_eq!(&pre[rel..rel + 4], &[0, 0, 0, 0]);

        let mut w = Cursor::new(Vec::new());
        Write::write_all(&mut w, &pre).unwrap();
        Write::write_all(&mut w, b"tail").unwrap();

        let slot = TagSlot {
            offset: rel as u64,
            len: 4,
        };
        patch_field(&mut w, slot, b"TAGS").unwrap();

        let out = w.into_inner();
        assert_eq!(&out[..3], b"hdr");
        assert_eq!(&out[3..7], &4i32.to_le_bytes());
        assert_eq!(&out[7..11], b"TAGS");
        assert_eq!(&out[11..], b"tail");
    }

    #[test]
    #[should_panic(expected = "tag must fill its reservation")]
    fn test_patch_length_mismatch_panics() {
        let mut w = Cursor::new(vec![0u8; 8]);
        let slot = TagSlot { offset: 0, len: 4 };
        let _ = patch_field(&mut w, slot, b"toolong");
    }

    #[tokio::test]
    async fn test_async_field_roundtrip() {
        let mut buf = Vec::new();
        write_field_async(&mut buf, b"async payload").await.unwrap();

        let mut r = Cursor::new(buf);
        let got = read_field_async(&mut r, "test field").await.unwrap();
        assert_eq!(got, b"async payload");
    }

    #[tokio::test]
    async fn test_async_patch() {
        let mut w = Cursor::new(Vec::new());
        AsyncWriteExt::write_all(&mut w, &4i32.to_le_bytes())
            .await
            .unwrap();
        AsyncWriteExt::write_all(&mut w, &[0u8; 4]).await.unwrap();
        AsyncWriteExt::write_all(&mut w, b"rest").await.unwrap();

        let slot = TagSlot { offset: 4, len: 4 };
        patch_field_async(&mut w, slot, b"TAGS").await.unwrap();
        assert_eq!(AsyncSeekExt::stream_position(&mut w).await.unwrap(), 12);

        let out = w.into_inner();
        assert_eq!(&out[4..8], b"TAGS");
        assert_eq!(&out[8..], b"rest");
    }
}
