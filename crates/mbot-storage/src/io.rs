//! File helpers for windowed multipart uploads.

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read `len` bytes starting at `offset`.
pub async fn read_range(path: &Path, offset: u64, len: u64) -> std::io::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buffer = vec![0u8; len as usize];
    file.read_exact(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

/// Split `size` bytes into `(offset, len)` windows of at most `part_size`.
///
/// An exact multiple of `part_size` produces no empty trailing window.
pub fn part_windows(size: u64, part_size: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::new();
    let mut offset = 0;
    while offset < size {
        let len = part_size.min(size - offset);
        windows.push((offset, len));
        offset += len;
    }
    windows
}
