//! # Log Types
//!
//! Self-describing entries buffered in each worker's log ring. Every entry
//! starts with the 8-byte [`LogHeader`]; the registry of type codes is
//! closed at build time.
//!
//! ## Entry Format
//!
//! ```text
//! +--------+--------+------------+----------------------+
//! | code   | length | storage_id | type-specific body   |
//! | (2 b)  | (2 b)  | (4 b)      | (length - 8 bytes)   |
//! +--------+--------+------------+----------------------+
//! ```
//!
//! `length` covers the whole entry including the header and is always a
//! multiple of [`LOG_ALIGN`](crate::config::LOG_ALIGN), so a ring-boundary
//! gap can always be papered over with a filler entry.
//!
//! ## Kinds
//!
//! Each code belongs to exactly one [`LogKind`], which selects the apply
//! entry point used during commit:
//!
//! - `Marker`: buffer bookkeeping (fillers, epoch markers); never applied.
//! - `Engine`: engine-wide metadata. No engine-wide types are registered
//!   yet; the kind exists for the dispatch contract.
//! - `Storage`: storage create/drop, applied via `apply_storage`.
//! - `Record`: per-record mutations, applied via `apply_record` while the
//!   record's key-lock is held.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{LOG_ALIGN, MAX_LOG_LENGTH};
use crate::epoch::Epoch;
use crate::error::{Result, XctError};
use crate::storage::StorageId;

/// Apply capability class of a log type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Marker,
    Engine,
    Storage,
    Record,
}

/// The closed set of log type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LogCode {
    Filler = 1,
    EpochMarker = 2,
    StorageCreate = 17,
    StorageDrop = 18,
    RecordInsert = 33,
    RecordOverwrite = 34,
    RecordDelete = 35,
}

impl LogCode {
    /// Total decode function over the registry; unknown codes are an error.
    pub fn from_u16(code: u16) -> Result<LogCode> {
        match code {
            1 => Ok(LogCode::Filler),
            2 => Ok(LogCode::EpochMarker),
            17 => Ok(LogCode::StorageCreate),
            18 => Ok(LogCode::StorageDrop),
            33 => Ok(LogCode::RecordInsert),
            34 => Ok(LogCode::RecordOverwrite),
            35 => Ok(LogCode::RecordDelete),
            code => Err(XctError::InvalidLogType { code }),
        }
    }

    pub fn kind(self) -> LogKind {
        match self {
            LogCode::Filler | LogCode::EpochMarker => LogKind::Marker,
            LogCode::StorageCreate | LogCode::StorageDrop => LogKind::Storage,
            LogCode::RecordInsert | LogCode::RecordOverwrite | LogCode::RecordDelete => {
                LogKind::Record
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LogCode::Filler => "FillerLog",
            LogCode::EpochMarker => "EpochMarkerLog",
            LogCode::StorageCreate => "StorageCreateLog",
            LogCode::StorageDrop => "StorageDropLog",
            LogCode::RecordInsert => "RecordInsertLog",
            LogCode::RecordOverwrite => "RecordOverwriteLog",
            LogCode::RecordDelete => "RecordDeleteLog",
        }
    }
}

/// Common prefix of every buffered entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct LogHeader {
    pub code: U16,
    pub length: U16,
    pub storage_id: U32,
}

/// Header size in bytes; also the minimum entry length.
pub const LOG_HEADER_SIZE: usize = std::mem::size_of::<LogHeader>();

impl LogHeader {
    pub fn new(code: LogCode, length: usize, storage_id: StorageId) -> LogHeader {
        debug_assert!(length >= LOG_HEADER_SIZE && length <= MAX_LOG_LENGTH);
        debug_assert_eq!(length % LOG_ALIGN, 0);
        LogHeader {
            code: U16::new(code as u16),
            length: U16::new(length as u16),
            storage_id: U32::new(storage_id),
        }
    }

    pub fn decode_code(&self) -> Result<LogCode> {
        LogCode::from_u16(self.code.get())
    }

    pub fn length(&self) -> usize {
        self.length.get() as usize
    }

    pub fn storage_id(&self) -> StorageId {
        self.storage_id.get()
    }

    /// Parses the header off the front of an entry.
    pub fn read_from(entry: &[u8]) -> Result<LogHeader> {
        match LogHeader::read_from_prefix(entry) {
            Ok((header, _)) => Ok(header),
            Err(_) => Err(XctError::InvalidLogType { code: 0 }),
        }
    }
}

/// Rounds an entry length up to the ring alignment.
pub const fn align_log_length(length: usize) -> usize {
    (length + LOG_ALIGN - 1) & !(LOG_ALIGN - 1)
}

/// Fixed body of an epoch-marker entry: the epoch boundary it records.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EpochMarkerBody {
    pub old_epoch: U32,
    pub new_epoch: U32,
}

/// Fixed body of a storage-create entry, followed by the name bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct StorageCreateBody {
    pub payload_capacity: U16,
    pub name_len: U16,
    pub _pad: U32,
}

/// Fixed body of a record-insert entry, followed by key then payload bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct RecordInsertBody {
    pub key_len: U16,
    pub payload_len: U16,
    pub _pad: U32,
}

/// Fixed body of a record-overwrite entry, followed by the payload slice.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct RecordOverwriteBody {
    pub payload_offset: U16,
    pub payload_len: U16,
    pub _pad: U32,
}

/// Encodes a filler entry covering exactly `length` bytes.
pub fn encode_filler(buf: &mut [u8], length: usize) {
    debug_assert!(length >= LOG_HEADER_SIZE && length % LOG_ALIGN == 0);
    let header = LogHeader::new(LogCode::Filler, length, 0);
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..length].fill(0);
}

/// Encoded length of an epoch-marker entry.
pub const EPOCH_MARKER_LENGTH: usize =
    align_log_length(LOG_HEADER_SIZE + std::mem::size_of::<EpochMarkerBody>());

pub fn encode_epoch_marker(buf: &mut [u8], old_epoch: Epoch, new_epoch: Epoch) {
    let header = LogHeader::new(LogCode::EpochMarker, EPOCH_MARKER_LENGTH, 0);
    let body = EpochMarkerBody {
        old_epoch: U32::new(old_epoch.value()),
        new_epoch: U32::new(new_epoch.value()),
    };
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..LOG_HEADER_SIZE + std::mem::size_of::<EpochMarkerBody>()]
        .copy_from_slice(body.as_bytes());
}

pub fn storage_create_length(name_len: usize) -> usize {
    align_log_length(LOG_HEADER_SIZE + std::mem::size_of::<StorageCreateBody>() + name_len)
}

pub fn encode_storage_create(
    buf: &mut [u8],
    storage_id: StorageId,
    name: &str,
    payload_capacity: u16,
) {
    let length = storage_create_length(name.len());
    let header = LogHeader::new(LogCode::StorageCreate, length, storage_id);
    let body = StorageCreateBody {
        payload_capacity: U16::new(payload_capacity),
        name_len: U16::new(name.len() as u16),
        _pad: U32::new(0),
    };
    let body_end = LOG_HEADER_SIZE + std::mem::size_of::<StorageCreateBody>();
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..body_end].copy_from_slice(body.as_bytes());
    buf[body_end..body_end + name.len()].copy_from_slice(name.as_bytes());
    buf[body_end + name.len()..length].fill(0);
}

pub const STORAGE_DROP_LENGTH: usize = align_log_length(LOG_HEADER_SIZE);

pub fn encode_storage_drop(buf: &mut [u8], storage_id: StorageId) {
    let header = LogHeader::new(LogCode::StorageDrop, STORAGE_DROP_LENGTH, storage_id);
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..STORAGE_DROP_LENGTH].fill(0);
}

pub fn record_insert_length(key_len: usize, payload_len: usize) -> usize {
    align_log_length(
        LOG_HEADER_SIZE + std::mem::size_of::<RecordInsertBody>() + key_len + payload_len,
    )
}

pub fn encode_record_insert(buf: &mut [u8], storage_id: StorageId, key: &[u8], payload: &[u8]) {
    let length = record_insert_length(key.len(), payload.len());
    let header = LogHeader::new(LogCode::RecordInsert, length, storage_id);
    let body = RecordInsertBody {
        key_len: U16::new(key.len() as u16),
        payload_len: U16::new(payload.len() as u16),
        _pad: U32::new(0),
    };
    let body_end = LOG_HEADER_SIZE + std::mem::size_of::<RecordInsertBody>();
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..body_end].copy_from_slice(body.as_bytes());
    buf[body_end..body_end + key.len()].copy_from_slice(key);
    buf[body_end + key.len()..body_end + key.len() + payload.len()].copy_from_slice(payload);
    buf[body_end + key.len() + payload.len()..length].fill(0);
}

pub fn record_overwrite_length(payload_len: usize) -> usize {
    align_log_length(LOG_HEADER_SIZE + std::mem::size_of::<RecordOverwriteBody>() + payload_len)
}

pub fn encode_record_overwrite(
    buf: &mut [u8],
    storage_id: StorageId,
    payload_offset: u16,
    payload: &[u8],
) {
    let length = record_overwrite_length(payload.len());
    let header = LogHeader::new(LogCode::RecordOverwrite, length, storage_id);
    let body = RecordOverwriteBody {
        payload_offset: U16::new(payload_offset),
        payload_len: U16::new(payload.len() as u16),
        _pad: U32::new(0),
    };
    let body_end = LOG_HEADER_SIZE + std::mem::size_of::<RecordOverwriteBody>();
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..body_end].copy_from_slice(body.as_bytes());
    buf[body_end..body_end + payload.len()].copy_from_slice(payload);
    buf[body_end + payload.len()..length].fill(0);
}

pub const RECORD_DELETE_LENGTH: usize = align_log_length(LOG_HEADER_SIZE);

pub fn encode_record_delete(buf: &mut [u8], storage_id: StorageId) {
    let header = LogHeader::new(LogCode::RecordDelete, RECORD_DELETE_LENGTH, storage_id);
    buf[..LOG_HEADER_SIZE].copy_from_slice(header.as_bytes());
    buf[LOG_HEADER_SIZE..RECORD_DELETE_LENGTH].fill(0);
}

/// Decoded view of a record-insert entry.
pub struct RecordInsertView<'a> {
    pub key: &'a [u8],
    pub payload: &'a [u8],
}

pub fn decode_record_insert(entry: &[u8]) -> Result<RecordInsertView<'_>> {
    let body_start = LOG_HEADER_SIZE;
    let (body, rest) = RecordInsertBody::read_from_prefix(&entry[body_start..])
        .map_err(|_| XctError::InvalidLogType { code: LogCode::RecordInsert as u16 })?;
    let key_len = body.key_len.get() as usize;
    let payload_len = body.payload_len.get() as usize;
    if rest.len() < key_len + payload_len {
        return Err(XctError::InvalidLogType { code: LogCode::RecordInsert as u16 });
    }
    Ok(RecordInsertView {
        key: &rest[..key_len],
        payload: &rest[key_len..key_len + payload_len],
    })
}

/// Decoded view of a record-overwrite entry.
pub struct RecordOverwriteView<'a> {
    pub payload_offset: usize,
    pub payload: &'a [u8],
}

pub fn decode_record_overwrite(entry: &[u8]) -> Result<RecordOverwriteView<'_>> {
    let (body, rest) = RecordOverwriteBody::read_from_prefix(&entry[LOG_HEADER_SIZE..])
        .map_err(|_| XctError::InvalidLogType { code: LogCode::RecordOverwrite as u16 })?;
    let payload_len = body.payload_len.get() as usize;
    if rest.len() < payload_len {
        return Err(XctError::InvalidLogType { code: LogCode::RecordOverwrite as u16 });
    }
    Ok(RecordOverwriteView {
        payload_offset: body.payload_offset.get() as usize,
        payload: &rest[..payload_len],
    })
}

/// Decoded view of a storage-create entry.
pub struct StorageCreateView<'a> {
    pub payload_capacity: u16,
    pub name: &'a [u8],
}

pub fn decode_storage_create(entry: &[u8]) -> Result<StorageCreateView<'_>> {
    let (body, rest) = StorageCreateBody::read_from_prefix(&entry[LOG_HEADER_SIZE..])
        .map_err(|_| XctError::InvalidLogType { code: LogCode::StorageCreate as u16 })?;
    let name_len = body.name_len.get() as usize;
    if rest.len() < name_len {
        return Err(XctError::InvalidLogType { code: LogCode::StorageCreate as u16 });
    }
    Ok(StorageCreateView {
        payload_capacity: body.payload_capacity.get(),
        name: &rest[..name_len],
    })
}

pub fn decode_epoch_marker(entry: &[u8]) -> Result<(Epoch, Epoch)> {
    let (body, _) = EpochMarkerBody::read_from_prefix(&entry[LOG_HEADER_SIZE..])
        .map_err(|_| XctError::InvalidLogType { code: LogCode::EpochMarker as u16 })?;
    Ok((
        crate::epoch::Epoch::from_int(body.old_epoch.get()),
        crate::epoch::Epoch::from_int(body.new_epoch.get()),
    ))
}
