//! Native on-disk format for ANN indexes.
//!
//! # Storage Format
//!
//! All integers and floats are little-endian.
//! - Header (32 bytes): magic `RVEC`, version u32, kind u32, dimension u32,
//!   record count u64, list count u32, nprobe u32
//! - Centroids: `list count * dimension` f32 values (IVF only)
//! - Records: `handle i64, list u32, dimension * f32`
//!
//! Files are written in one piece through a temp file and rename, and read
//! back through a memory map.

use std::fs::File;
use std::path::Path;

use memmap2::MmapOptions;

use crate::io::atomic::write_atomic;
use crate::vector::index::IndexSnapshot;
use crate::vector::types::{Handle, IndexKind, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 32;

/// Magic bytes to identify index files.
const MAGIC_BYTES: &[u8; 4] = b"RVEC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Bytes of handle plus list number preceding each record's vector.
const RECORD_PREFIX: usize = 12;

/// Serializes `snapshot` to `path`, replacing any previous file atomically.
pub fn write_index(path: &Path, snapshot: &IndexSnapshot) -> Result<(), VectorError> {
    let dimension = snapshot.dimension.get();
    let record_size = RECORD_PREFIX + dimension * BYTES_PER_F32;
    let mut buf = Vec::with_capacity(
        HEADER_SIZE
            + snapshot.centroids.len() * dimension * BYTES_PER_F32
            + snapshot.records.len() * record_size,
    );

    buf.extend_from_slice(MAGIC_BYTES);
    buf.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
    buf.extend_from_slice(&snapshot.kind.to_tag().to_le_bytes());
    buf.extend_from_slice(&(dimension as u32).to_le_bytes());
    buf.extend_from_slice(&(snapshot.records.len() as u64).to_le_bytes());
    buf.extend_from_slice(&(snapshot.centroids.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(snapshot.nprobe as u32).to_le_bytes());

    for centroid in &snapshot.centroids {
        snapshot.dimension.validate_vector(centroid)?;
        for value in centroid {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    for (handle, list, vector) in &snapshot.records {
        snapshot.dimension.validate_vector(vector)?;
        buf.extend_from_slice(&handle.to_bytes());
        buf.extend_from_slice(&list.to_le_bytes());
        for value in vector {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    write_atomic(path, &buf)?;
    Ok(())
}

/// Reads an index file written by [`write_index`].
pub fn read_index(path: &Path) -> Result<IndexSnapshot, VectorError> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(VectorError::InvalidFormat("empty index file".to_string()));
    }
    // SAFETY: the file is only replaced by rename, never modified in place.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    let bytes: &[u8] = &mmap;

    if bytes.len() < HEADER_SIZE {
        return Err(VectorError::InvalidFormat(format!(
            "file is {} bytes, shorter than the header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(VectorError::InvalidFormat("bad magic bytes".to_string()));
    }
    let version = read_u32(bytes, 4);
    if version != STORAGE_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        });
    }
    let kind = IndexKind::from_tag(read_u32(bytes, 8))
        .ok_or_else(|| VectorError::InvalidFormat("unknown index kind tag".to_string()))?;
    let dimension = VectorDimension::new(read_u32(bytes, 12) as usize)?;
    let count = read_u64(bytes, 16) as usize;
    let list_count = read_u32(bytes, 24) as usize;
    let nprobe = read_u32(bytes, 28) as usize;

    let dim = dimension.get();
    let record_size = RECORD_PREFIX + dim * BYTES_PER_F32;
    let expected = expected_len(list_count, dim, count, record_size).ok_or_else(|| {
        VectorError::InvalidFormat(format!(
            "header declares {count} records and {list_count} lists, more than any file can hold"
        ))
    })?;
    if bytes.len() != expected {
        return Err(VectorError::InvalidFormat(format!(
            "expected {expected} bytes for {count} records, found {}",
            bytes.len()
        )));
    }

    let mut offset = HEADER_SIZE;
    let mut centroids = Vec::with_capacity(list_count);
    for _ in 0..list_count {
        centroids.push(read_f32s(bytes, offset, dim));
        offset += dim * BYTES_PER_F32;
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let handle = Handle::new(read_u64(bytes, offset) as i64);
        let list = read_u32(bytes, offset + 8);
        let vector = read_f32s(bytes, offset + RECORD_PREFIX, dim);
        records.push((handle, list, vector));
        offset += record_size;
    }

    Ok(IndexSnapshot {
        kind,
        dimension,
        nprobe,
        centroids,
        records,
    })
}

/// Total file size implied by the header, `None` on overflow.
fn expected_len(list_count: usize, dim: usize, count: usize, record_size: usize) -> Option<usize> {
    let centroid_bytes = list_count.checked_mul(dim)?.checked_mul(BYTES_PER_F32)?;
    let record_bytes = count.checked_mul(record_size)?;
    HEADER_SIZE
        .checked_add(centroid_bytes)?
        .checked_add(record_bytes)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn read_f32s(bytes: &[u8], offset: usize, count: usize) -> Vec<f32> {
    bytes[offset..offset + count * BYTES_PER_F32]
        .chunks_exact(BYTES_PER_F32)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
