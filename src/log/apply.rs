//! # Log Apply Dispatch
//!
//! Routes a buffered log entry to the apply routine its type defines. The
//! registry is closed at build time, so dispatch is a single total match on
//! the type code; unknown codes surface `InvalidLogType`.
//!
//! Record applies run while the committing worker holds the record's
//! key-lock. Each one writes the payload first and publishes the freshly
//! issued owner identifier last, with release ordering, which is also what
//! releases the lock: concurrent readers either see the old id (and wait
//! out the lock) or the new id together with the new payload.

use std::fmt::Write as _;

use crate::error::{Result, XctError};
use crate::log::types::{
    decode_epoch_marker, decode_record_insert, decode_record_overwrite, decode_storage_create,
    LogCode, LogHeader,
};
use crate::storage::{OrderedStorage, Record};
use crate::xct::xct::Xct;
use crate::xct::xct_id::XctId;

/// Applies an engine-wide log entry.
///
/// No engine-wide log types are registered yet; the entry point exists for
/// the schema-commit dispatch contract and rejects every current code.
pub fn apply_engine(_new_id: XctId, entry: &[u8], _xct: &Xct) -> Result<()> {
    let header = LogHeader::read_from(entry)?;
    let code = header.decode_code()?;
    Err(XctError::InvalidLogType { code: code as u16 })
}

/// Applies a storage-wide log entry (create/drop) to `storage`.
pub fn apply_storage(new_id: XctId, entry: &[u8], storage: &OrderedStorage) -> Result<()> {
    let header = LogHeader::read_from(entry)?;
    match header.decode_code()? {
        LogCode::StorageCreate => {
            let view = decode_storage_create(entry)?;
            debug_assert_eq!(view.name, storage.name().as_bytes());
            storage.mark_created(new_id);
            Ok(())
        }
        LogCode::StorageDrop => {
            storage.mark_dropped(new_id);
            Ok(())
        }
        code => Err(XctError::InvalidLogType { code: code as u16 }),
    }
}

/// Applies a per-record log entry to `record`, publishing `new_id`.
pub fn apply_record(
    new_id: XctId,
    entry: &[u8],
    _xct: &Xct,
    storage: &OrderedStorage,
    record: &Record,
) -> Result<()> {
    debug_assert!(record.owner_id().is_keylocked());
    debug_assert!(new_id.is_status_clear());
    let header = LogHeader::read_from(entry)?;
    debug_assert_eq!(header.storage_id(), storage.id());
    match header.decode_code()? {
        LogCode::RecordInsert => {
            let view = decode_record_insert(entry)?;
            record.install_payload(view.payload);
            record.owner_id().publish(new_id);
            Ok(())
        }
        LogCode::RecordOverwrite => {
            let view = decode_record_overwrite(entry)?;
            record.overwrite_payload(view.payload_offset, view.payload);
            record.owner_id().publish(new_id);
            Ok(())
        }
        LogCode::RecordDelete => {
            record.owner_id().publish_deleted(new_id);
            Ok(())
        }
        code => Err(XctError::InvalidLogType { code: code as u16 }),
    }
}

/// Renders an entry as an XML-style element. Diagnostics only.
pub fn dump_log(entry: &[u8]) -> String {
    let mut out = String::new();
    let header = match LogHeader::read_from(entry) {
        Ok(header) => header,
        Err(_) => return "<TruncatedLog/>".to_string(),
    };
    let code = match header.decode_code() {
        Ok(code) => code,
        Err(_) => {
            let _ = write!(
                out,
                "<UnknownLog code=\"{}\" length=\"{}\"/>",
                header.code.get(),
                header.length()
            );
            return out;
        }
    };
    let _ = write!(
        out,
        "<{} length=\"{}\" storage_id=\"{}\"",
        code.name(),
        header.length(),
        header.storage_id()
    );
    match code {
        LogCode::EpochMarker => {
            if let Ok((old, new)) = decode_epoch_marker(entry) {
                let _ = write!(
                    out,
                    " old_epoch=\"{}\" new_epoch=\"{}\"",
                    old.value(),
                    new.value()
                );
            }
        }
        LogCode::StorageCreate => {
            if let Ok(view) = decode_storage_create(entry) {
                let _ = write!(
                    out,
                    " name=\"{}\" payload_capacity=\"{}\"",
                    String::from_utf8_lossy(view.name),
                    view.payload_capacity
                );
            }
        }
        LogCode::RecordInsert => {
            if let Ok(view) = decode_record_insert(entry) {
                let _ = write!(
                    out,
                    " key_len=\"{}\" payload_len=\"{}\"",
                    view.key.len(),
                    view.payload.len()
                );
            }
        }
        LogCode::RecordOverwrite => {
            if let Ok(view) = decode_record_overwrite(entry) {
                let _ = write!(
                    out,
                    " payload_offset=\"{}\" payload_len=\"{}\"",
                    view.payload_offset,
                    view.payload.len()
                );
            }
        }
        LogCode::Filler | LogCode::StorageDrop | LogCode::RecordDelete => {}
    }
    out.push_str("/>");
    out
}
