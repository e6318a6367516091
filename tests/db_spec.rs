use chrono::Duration;
use kv_cluster::db::{Database, StoreError};
use kv_cluster::models::*;
use speculate2::speculate;

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "get" {
        it "returns None for a key that was never written" {
            let value = db.get(b"missing").expect("Query failed");
            assert!(value.is_none());
        }

        it "returns the stored value" {
            db.upsert(b"key", b"value").expect("Failed to upsert");

            let value = db.get(b"key").expect("Query failed");
            assert_eq!(value, Some(b"value".to_vec()));
        }

        it "treats keys as raw bytes" {
            db.upsert(&[0, 255, 1], b"binary").expect("Failed to upsert");

            assert_eq!(db.get(&[0, 255, 1]).expect("Query failed"), Some(b"binary".to_vec()));
            assert!(db.get(&[0, 255]).expect("Query failed").is_none());
        }

        it "hides tombstones" {
            db.upsert(b"key", b"value").expect("Failed to upsert");
            db.remove(b"key").expect("Failed to remove");

            assert!(db.get(b"key").expect("Query failed").is_none());
        }
    }

    describe "upsert" {
        it "overwrites the previous value" {
            db.upsert(b"key", b"first").expect("Failed to upsert");
            db.upsert(b"key", b"second").expect("Failed to upsert");

            assert_eq!(db.get(b"key").expect("Query failed"), Some(b"second".to_vec()));
        }

        it "stores empty values" {
            db.upsert(b"key", b"").expect("Failed to upsert");

            assert_eq!(db.get(b"key").expect("Query failed"), Some(Vec::new()));
        }

        it "revives a deleted key" {
            db.upsert(b"key", b"first").expect("Failed to upsert");
            db.remove(b"key").expect("Failed to remove");
            db.upsert(b"key", b"again").expect("Failed to upsert");

            assert_eq!(db.get(b"key").expect("Query failed"), Some(b"again".to_vec()));
        }
    }

    describe "remove" {
        it "reports whether a live value existed" {
            db.upsert(b"key", b"value").expect("Failed to upsert");

            assert!(db.remove(b"key").expect("Failed to remove"));
            assert!(!db.remove(b"key").expect("Failed to remove"));
            assert!(!db.remove(b"never").expect("Failed to remove"));
        }

        it "leaves a tombstone behind" {
            db.upsert(b"key", b"value").expect("Failed to upsert");
            db.remove(b"key").expect("Failed to remove");

            let record = db.get_record(b"key").expect("Query failed").expect("Record missing");
            assert!(record.deleted);
            assert!(record.value.is_empty());
        }
    }

    describe "upsert_record" {
        it "applies a newer record" {
            let t = now_micros();
            db.upsert_record(b"key", &Record::live(b"old".to_vec(), t)).expect("Failed to apply");

            let applied = db
                .upsert_record(b"key", &Record::live(b"new".to_vec(), t + Duration::seconds(1)))
                .expect("Failed to apply");

            assert!(applied);
            assert_eq!(db.get(b"key").expect("Query failed"), Some(b"new".to_vec()));
        }

        it "ignores an older record" {
            let t = now_micros();
            db.upsert_record(b"key", &Record::live(b"new".to_vec(), t)).expect("Failed to apply");

            let applied = db
                .upsert_record(b"key", &Record::live(b"old".to_vec(), t - Duration::seconds(1)))
                .expect("Failed to apply");

            assert!(!applied);
            assert_eq!(db.get(b"key").expect("Query failed"), Some(b"new".to_vec()));
        }

        it "lets a tombstone win a tie" {
            let t = now_micros();
            db.upsert_record(b"key", &Record::live(b"v".to_vec(), t)).expect("Failed to apply");

            assert!(db.upsert_record(b"key", &Record::tombstone(t)).expect("Failed to apply"));
            assert!(!db.upsert_record(b"key", &Record::live(b"v".to_vec(), t)).expect("Failed to apply"));
            assert!(db.get(b"key").expect("Query failed").is_none());
        }

        it "settles equal-timestamp writes on the same value in any order" {
            let t = now_micros();
            let a = Record::live(b"a".to_vec(), t);
            let b = Record::live(b"b".to_vec(), t);

            db.upsert_record(b"ab", &a).expect("Failed to apply");
            assert!(db.upsert_record(b"ab", &b).expect("Failed to apply"));

            db.upsert_record(b"ba", &b).expect("Failed to apply");
            assert!(!db.upsert_record(b"ba", &a).expect("Failed to apply"));

            assert_eq!(db.get(b"ab").expect("Query failed"), Some(b"b".to_vec()));
            assert_eq!(db.get(b"ba").expect("Query failed"), Some(b"b".to_vec()));
        }

        it "keeps the coordinator's timestamp" {
            let t = now_micros() - Duration::hours(1);
            db.upsert_record(b"key", &Record::live(b"v".to_vec(), t)).expect("Failed to apply");

            let record = db.get_record(b"key").expect("Query failed").expect("Record missing");
            assert_eq!(record, Record::live(b"v".to_vec(), t));
        }
    }

    describe "len" {
        it "counts live keys only" {
            assert!(db.is_empty().expect("Query failed"));

            db.upsert(b"a", b"1").expect("Failed to upsert");
            db.upsert(b"b", b"2").expect("Failed to upsert");
            db.remove(b"a").expect("Failed to remove");

            assert_eq!(db.len().expect("Query failed"), 1);
        }
    }

    describe "purge_tombstones" {
        it "drops only tombstones older than the cutoff" {
            let t = now_micros();
            db.upsert_record(b"old", &Record::tombstone(t - Duration::days(2))).expect("Failed to apply");
            db.upsert_record(b"fresh", &Record::tombstone(t)).expect("Failed to apply");
            db.upsert_record(b"live", &Record::live(b"v".to_vec(), t - Duration::days(2))).expect("Failed to apply");

            let purged = db.purge_tombstones(t - Duration::days(1)).expect("Failed to purge");

            assert_eq!(purged, 1);
            assert!(db.get_record(b"old").expect("Query failed").is_none());
            assert!(db.get_record(b"fresh").expect("Query failed").is_some());
            assert_eq!(db.get(b"live").expect("Query failed"), Some(b"v".to_vec()));
        }
    }

    describe "accessibility" {
        it "rejects operations while inaccessible" {
            db.upsert(b"key", b"value").expect("Failed to upsert");
            db.set_accessible(false);

            assert!(!db.is_accessible());
            assert!(matches!(db.get(b"key"), Err(StoreError::Unavailable)));
            assert!(matches!(db.upsert(b"key", b"x"), Err(StoreError::Unavailable)));
            assert!(matches!(db.remove(b"key"), Err(StoreError::Unavailable)));
        }

        it "keeps data across a stop and start" {
            db.upsert(b"key", b"value").expect("Failed to upsert");
            db.set_accessible(false);
            db.set_accessible(true);

            assert_eq!(db.get(b"key").expect("Query failed"), Some(b"value".to_vec()));
        }

        it "is shared between clones" {
            let other = db.clone();
            other.set_accessible(false);

            assert!(!db.is_accessible());
        }
    }
}

mod on_disk {
    use super::*;

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        {
            let db = Database::open_dir(dir.path()).expect("Failed to open");
            db.migrate().expect("Failed to migrate");
            db.upsert(b"key", b"persisted").expect("Failed to upsert");
        }

        let db = Database::open_dir(dir.path()).expect("Failed to reopen");
        db.migrate().expect("Failed to migrate");
        assert_eq!(db.get(b"key").expect("Query failed"), Some(b"persisted".to_vec()));
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let nested = dir.path().join("a").join("b");

        let db = Database::open_dir(&nested).expect("Failed to open");
        db.migrate().expect("Failed to migrate");

        assert!(nested.join("store.db").exists());
    }
}
