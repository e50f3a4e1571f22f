//! Write-ahead journal for the node registry.
//!
//! Every mutation is appended as a length-prefixed bincode record before the
//! in-memory table changes. On open the journal is replayed in order.
//!
//! Record framing: `u32` little-endian payload length, then the payload.
//! A short read at the end of the file is a crash during append and the tail
//! is truncated away. An undecodable record with a complete frame, or a frame
//! length above [`MAX_RECORD_LEN`], is corruption.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::types::{HaMembership, HardwareFacts, Node, NodeId, NodeIdentity, StatusRecord};

/// Upper bound on a single encoded record.
pub const MAX_RECORD_LEN: u32 = 4 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// One registry mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A new row, with its initial status.
    Upsert {
        /// The complete row as first inserted.
        node: Node,
    },
    /// Re-discovery replaced the identity of an existing row.
    Identity {
        /// Row id.
        id: NodeId,
        /// Replacement identity.
        identity: NodeIdentity,
    },
    /// A status write.
    Status {
        /// Row id.
        id: NodeId,
        /// The status and its timestamp.
        record: StatusRecord,
    },
    /// Hardware facts refreshed on PXE boot.
    Hardware {
        /// Row id.
        id: NodeId,
        /// New facts.
        facts: HardwareFacts,
    },
    /// Role assignment changed.
    Role {
        /// Row id.
        id: NodeId,
        /// New role, or none.
        role: Option<String>,
    },
    /// HA membership marker changed.
    Ha {
        /// Row id.
        id: NodeId,
        /// New marker, or none.
        membership: Option<HaMembership>,
    },
    /// Row deleted.
    Remove {
        /// Row id.
        id: NodeId,
    },
}

/// Append-only journal file.
pub struct RegistryJournal {
    file: File,
    path: PathBuf,
    appended: u64,
}

impl RegistryJournal {
    /// Opens (or creates) the journal at `path` and returns it together with
    /// every intact record, in append order.
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<(Self, Vec<JournalRecord>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (records, valid_len) = decode_all(&buf)?;

        if valid_len < buf.len() as u64 {
            warn!(
                path = %path.display(),
                dropped_bytes = buf.len() as u64 - valid_len,
                "truncating incomplete journal tail"
            );
            file.set_len(valid_len)?;
        }

        debug!(path = %path.display(), records = records.len(), "registry journal opened");
        Ok((
            Self {
                file,
                path,
                appended: 0,
            },
            records,
        ))
    }

    /// Appends one record and syncs it to disk.
    pub fn append(&mut self, record: &JournalRecord) -> RegistryResult<()> {
        let payload = bincode::serialize(record)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|l| *l <= MAX_RECORD_LEN)
            .ok_or_else(|| RegistryError::Corrupted {
                offset: 0,
                reason: format!("record of {} bytes exceeds limit", payload.len()),
            })?;

        let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.appended += 1;
        Ok(())
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended since this handle was opened.
    pub fn appended(&self) -> u64 {
        self.appended
    }
}

/// Decodes every complete record. Returns the records and the length of the
/// valid prefix of `buf`.
fn decode_all(buf: &[u8]) -> RegistryResult<(Vec<JournalRecord>, u64)> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < LEN_PREFIX {
            break;
        }
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&buf[offset..offset + LEN_PREFIX]);
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_RECORD_LEN {
            return Err(RegistryError::Corrupted {
                offset: offset as u64,
                reason: format!("frame length {} exceeds limit", len),
            });
        }
        let len = len as usize;
        if remaining - LEN_PREFIX < len {
            break;
        }
        let start = offset + LEN_PREFIX;
        let record: JournalRecord =
            bincode::deserialize(&buf[start..start + len]).map_err(|e| RegistryError::Corrupted {
                offset: offset as u64,
                reason: e.to_string(),
            })?;
        records.push(record);
        offset = start + len;
    }

    Ok((records, offset as u64))
}
