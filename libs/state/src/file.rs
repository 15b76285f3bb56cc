//! File-backed state store
//!
//! The whole key space is small (a handful of lifecycle keys) so every write rewrites a
//! single snapshot file:
//!
//! ```text
//! "BMPS" | version u8 | count u32 | { key_len u16 | key | value_len u32 | value }* | crc32 u32
//! ```
//!
//! Integers are big-endian and the CRC covers every preceding byte. Snapshots are written to
//! a temporary file, synced, renamed over the previous snapshot and the directory is synced,
//! so a crash leaves either the old or the new snapshot in place.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::store::StateStore;

const MAGIC: &[u8; 4] = b"BMPS";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4;
const CRC_LEN: usize = 4;

pub const STATE_FILE_NAME: &str = "session.state";

#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    path: PathBuf,
    entries: Mutex<BTreeMap<Vec<u8>, Bytes>>,
}

impl FileStateStore {
    /// Open the store in `dir`, creating the directory when missing
    ///
    /// A snapshot that fails its integrity check is reported as [`StoreError::Corrupted`]
    /// and left on disk untouched.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(STATE_FILE_NAME);
        let tmp = temp_path(&path);
        if tmp.exists() {
            warn!("Removing incomplete state snapshot {:?}", tmp);
            fs::remove_file(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        }

        let entries = match fs::read(&path) {
            Ok(raw) => decode_snapshot(&path, &raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        info!(
            path = ?path,
            keys = entries.len(),
            "State store opened"
        );

        Ok(Self {
            dir,
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<Vec<u8>, Bytes>) -> Result<()> {
        let snapshot = encode_snapshot(entries)?;
        let tmp = temp_path(&self.path);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&snapshot)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        sync_dir(&self.dir)?;

        debug!(keys = entries.len(), bytes = snapshot.len(), "State snapshot written");
        Ok(())
    }

    fn apply(&self, batch: &[(&[u8], &[u8])]) -> Result<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        for (key, value) in batch {
            next.insert(key.to_vec(), Bytes::copy_from_slice(value));
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(&[(key, value)])
    }

    fn write_batch(&self, entries: &[(&[u8], &[u8])]) -> Result<()> {
        self.apply(entries)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn encode_snapshot(entries: &BTreeMap<Vec<u8>, Bytes>) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + CRC_LEN + entries.len() * 32);
    buf.put_slice(MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u32(entries.len() as u32);

    for (key, value) in entries {
        let key_len = u16::try_from(key.len()).map_err(|_| StoreError::Encoding {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: format!("key length {} exceeds {}", key.len(), u16::MAX),
        })?;
        let value_len = u32::try_from(value.len()).map_err(|_| StoreError::Encoding {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: format!("value length {} exceeds {}", value.len(), u32::MAX),
        })?;
        buf.put_u16(key_len);
        buf.put_slice(key);
        buf.put_u32(value_len);
        buf.put_slice(value);
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32(crc);
    Ok(buf.freeze())
}

fn decode_snapshot(path: &Path, raw: &[u8]) -> Result<BTreeMap<Vec<u8>, Bytes>> {
    let corrupted = |reason: String| StoreError::Corrupted {
        path: path.to_path_buf(),
        reason,
    };

    if raw.len() < HEADER_LEN + CRC_LEN {
        return Err(corrupted(format!("{} bytes is shorter than the header", raw.len())));
    }

    let (body, trailer) = raw.split_at(raw.len() - CRC_LEN);
    let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(corrupted(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    let mut cursor = body;
    if &cursor[..4] != MAGIC {
        return Err(corrupted("bad magic".to_string()));
    }
    cursor.advance(4);
    let version = cursor.get_u8();
    if version != FORMAT_VERSION {
        return Err(corrupted(format!("unsupported format version {}", version)));
    }
    let count = cursor.get_u32();

    let mut entries = BTreeMap::new();
    for index in 0..count {
        let truncated = || corrupted(format!("entry {} of {} truncated", index, count));

        if cursor.remaining() < 2 {
            return Err(truncated());
        }
        let key_len = cursor.get_u16() as usize;
        if cursor.remaining() < key_len + 4 {
            return Err(truncated());
        }
        let key = cursor[..key_len].to_vec();
        cursor.advance(key_len);
        let value_len = cursor.get_u32() as usize;
        if cursor.remaining() < value_len {
            return Err(truncated());
        }
        let value = Bytes::copy_from_slice(&cursor[..value_len]);
        cursor.advance(value_len);
        entries.insert(key, value);
    }

    if cursor.has_remaining() {
        return Err(corrupted(format!("{} trailing bytes", cursor.remaining())));
    }
    Ok(entries)
}
