//! # Basic Transaction Tests
//!
//! Single-worker lifecycle coverage: empty commits, insert/read/overwrite
//! round-trips, delete visibility, abort invisibility, and the lifecycle
//! misuse errors.
//!
//! All tests run on `Config::tiny()` so the epoch clock ticks fast and
//! capacity edges stay reachable.

use std::sync::Arc;
use std::time::Duration;

use pactdb::{Config, Engine, IsolationLevel, StorageMeta, XctError};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn tiny_engine() -> Arc<Engine> {
    let engine = Engine::new(Config::tiny()).unwrap();
    engine.initialize().unwrap();
    engine
}

mod empty_transactions {
    use super::*;

    #[test]
    fn empty_precommit_commits_at_a_durable_bound() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();

        engine
            .xct_manager()
            .begin_xct(&mut worker, IsolationLevel::Serializable)
            .unwrap();
        let epoch = engine.xct_manager().precommit_xct(&mut worker).unwrap();

        // No reads: the commit epoch is the conservative durable bound and
        // is already durable by construction.
        engine.xct_manager().wait_for_commit(epoch, WAIT).unwrap();
    }

    #[test]
    fn begin_while_active_is_already_running() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();

        engine
            .xct_manager()
            .begin_xct(&mut worker, IsolationLevel::Serializable)
            .unwrap();
        let err = engine
            .xct_manager()
            .begin_xct(&mut worker, IsolationLevel::Serializable)
            .unwrap_err();
        assert_eq!(err, XctError::AlreadyRunning);

        engine.xct_manager().abort_xct(&mut worker).unwrap();
    }

    #[test]
    fn precommit_without_begin_is_no_transaction() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let err = engine.xct_manager().precommit_xct(&mut worker).unwrap_err();
        assert_eq!(err, XctError::NoTransaction);
        let err = engine.xct_manager().abort_xct(&mut worker).unwrap_err();
        assert_eq!(err, XctError::NoTransaction);
    }
}

mod create_and_query {
    use super::*;

    #[test]
    fn get_on_empty_storage_is_key_not_found() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("test2", 16))
            .unwrap();

        engine
            .xct_manager()
            .begin_xct(&mut worker, IsolationLevel::Serializable)
            .unwrap();
        let key = vec![0u8; 100];
        let mut out = [0u8; 16];
        let err = storage.get_record(&mut worker, &key, &mut out).unwrap_err();
        assert_eq!(err, XctError::KeyNotFound);

        let epoch = engine.xct_manager().precommit_xct(&mut worker).unwrap();
        engine.xct_manager().wait_for_commit(epoch, WAIT).unwrap();
    }
}

mod insert_read_overwrite {
    use super::*;

    #[test]
    fn insert_then_read_roundtrips() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("ggg", 16))
            .unwrap();

        let data: u64 = 897_565_433_333_126;
        engine
            .xct_manager()
            .begin_xct(&mut worker, IsolationLevel::Serializable)
            .unwrap();
        storage
            .insert_normalized(&mut worker, 12345, &data.to_le_bytes())
            .unwrap();
        let e1 = engine.xct_manager().precommit_xct(&mut worker).unwrap();
        engine.xct_manager().wait_for_commit(e1, WAIT).unwrap();

        engine
            .xct_manager()
            .begin_xct(&mut worker, IsolationLevel::Serializable)
            .unwrap();
        let mut out = [0u8; 16];
        let len = storage.get_normalized(&mut worker, 12345, &mut out).unwrap();
        assert_eq!(len, 8);
        assert_eq!(u64::from_le_bytes(out[..8].try_into().unwrap()), data);
        let e2 = engine.xct_manager().precommit_xct(&mut worker).unwrap();

        assert!(e1.is_valid() && e2.is_valid());
        assert!(!e2.before(e1), "reader's epoch must not precede the writer's");
    }

    #[test]
    fn overwrite_replaces_payload() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("ggg", 16))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage
            .insert_normalized(&mut worker, 12345, &897_565_433_333_126u64.to_le_bytes())
            .unwrap();
        let e1 = xm.precommit_xct(&mut worker).unwrap();
        xm.wait_for_commit(e1, WAIT).unwrap();

        let newer: u64 = 321_654_987;
        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage
            .overwrite_normalized(&mut worker, 12345, &newer.to_le_bytes(), 0)
            .unwrap();
        let e2 = xm.precommit_xct(&mut worker).unwrap();
        xm.wait_for_commit(e2, WAIT).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let mut out = [0u8; 16];
        let len = storage.get_normalized(&mut worker, 12345, &mut out).unwrap();
        assert_eq!(len, 8);
        assert_eq!(u64::from_le_bytes(out[..8].try_into().unwrap()), newer);
        xm.precommit_xct(&mut worker).unwrap();
    }

    #[test]
    fn overwrite_of_missing_key_is_key_not_found() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let err = storage
            .overwrite_normalized(&mut worker, 7, b"x", 0)
            .unwrap_err();
        assert_eq!(err, XctError::KeyNotFound);
        xm.abort_xct(&mut worker).unwrap();
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.insert_normalized(&mut worker, 1, b"a").unwrap();
        let e = xm.precommit_xct(&mut worker).unwrap();
        xm.wait_for_commit(e, WAIT).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let err = storage.insert_normalized(&mut worker, 1, b"b").unwrap_err();
        assert_eq!(err, XctError::KeyAlreadyExists);
        xm.abort_xct(&mut worker).unwrap();
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 8))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let err = storage
            .insert_normalized(&mut worker, 1, &[0u8; 9])
            .unwrap_err();
        assert_eq!(err, XctError::PayloadTooLarge { got: 9, capacity: 8 });
        xm.abort_xct(&mut worker).unwrap();
    }
}

mod abort_and_delete {
    use super::*;

    #[test]
    fn aborted_insert_is_invisible() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.insert_normalized(&mut worker, 5, b"ghost").unwrap();
        xm.abort_xct(&mut worker).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let mut out = [0u8; 16];
        let err = storage.get_normalized(&mut worker, 5, &mut out).unwrap_err();
        assert_eq!(err, XctError::KeyNotFound);
        xm.precommit_xct(&mut worker).unwrap();
    }

    #[test]
    fn abort_leaves_log_buffer_clean() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.insert_normalized(&mut worker, 5, b"ghost").unwrap();
        xm.abort_xct(&mut worker).unwrap();

        assert_eq!(
            worker.log_buffer().offset_tail(),
            worker.log_buffer().offset_committed(),
            "aborted log bytes must be discarded"
        );
    }

    #[test]
    fn delete_hides_record_and_insert_revives_it() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.insert_normalized(&mut worker, 9, b"first").unwrap();
        let e = xm.precommit_xct(&mut worker).unwrap();
        xm.wait_for_commit(e, WAIT).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.delete_normalized(&mut worker, 9).unwrap();
        let e = xm.precommit_xct(&mut worker).unwrap();
        xm.wait_for_commit(e, WAIT).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let mut out = [0u8; 16];
        let err = storage.get_normalized(&mut worker, 9, &mut out).unwrap_err();
        assert_eq!(err, XctError::KeyNotFound);
        xm.precommit_xct(&mut worker).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.insert_normalized(&mut worker, 9, b"second").unwrap();
        let e = xm.precommit_xct(&mut worker).unwrap();
        xm.wait_for_commit(e, WAIT).unwrap();

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let len = storage.get_normalized(&mut worker, 9, &mut out).unwrap();
        assert_eq!(&out[..len], b"second");
        xm.precommit_xct(&mut worker).unwrap();
    }
}

mod capacity_limits {
    use super::*;

    #[test]
    fn read_set_overflow_is_reported_and_recoverable() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();
        let limit = engine.config().max_read_set_size as u64;

        for key in 0..=limit {
            xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
            storage
                .insert_normalized(&mut worker, key, b"row")
                .unwrap();
            let e = xm.precommit_xct(&mut worker).unwrap();
            xm.wait_for_commit(e, WAIT).unwrap();
        }

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let mut out = [0u8; 16];
        let mut overflow = None;
        for key in 0..=limit {
            match storage.get_normalized(&mut worker, key, &mut out) {
                Ok(_) => {}
                Err(err) => {
                    overflow = Some(err);
                    break;
                }
            }
        }
        assert_eq!(
            overflow,
            Some(XctError::ReadSetOverflow {
                limit: limit as u32
            })
        );
        xm.abort_xct(&mut worker).unwrap();
    }

    #[test]
    fn write_set_overflow_is_reported_and_recoverable() {
        let engine = tiny_engine();
        let mut worker = engine.attach_worker().unwrap();
        let storage = engine
            .storage_manager()
            .create_storage(&engine, &mut worker, StorageMeta::new("t", 16))
            .unwrap();
        let xm = engine.xct_manager();
        let limit = engine.config().max_write_set_size as u64;

        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        let mut overflow = None;
        for key in 0..=limit + limit {
            match storage.insert_normalized(&mut worker, key, b"row") {
                Ok(_) => {}
                Err(err) => {
                    overflow = Some(err);
                    break;
                }
            }
        }
        assert_eq!(
            overflow,
            Some(XctError::WriteSetOverflow {
                limit: limit as u32
            })
        );
        xm.abort_xct(&mut worker).unwrap();

        // The worker is fully usable afterwards.
        xm.begin_xct(&mut worker, IsolationLevel::Serializable).unwrap();
        storage.insert_normalized(&mut worker, 0, b"row").unwrap();
        xm.precommit_xct(&mut worker).unwrap();
    }
}

mod engine_lifecycle {
    use super::*;

    #[test]
    fn double_initialize_is_an_error() {
        let engine = tiny_engine();
        assert!(engine.initialize().is_err());
        engine.uninitialize().unwrap();
    }

    #[test]
    fn attach_requires_initialized_engine() {
        let engine = Engine::new(Config::tiny()).unwrap();
        assert!(engine.attach_worker().is_err());
    }

    #[test]
    fn uninitialize_then_reinitialize_round_trips() {
        let engine = tiny_engine();
        engine.uninitialize().unwrap();
        assert!(!engine.is_initialized());
        engine.initialize().unwrap();
        assert!(engine.is_initialized());
    }
}
