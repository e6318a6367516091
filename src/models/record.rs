use chrono::{DateTime, Utc};

/// A stored entry.
///
/// Deletes never drop a row; they leave a tombstone so that a replica which
/// missed the delete cannot resurrect the value during a quorum read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The stored bytes. Always empty for tombstones.
    pub value: Vec<u8>,
    /// When the coordinating node accepted the write.
    pub timestamp: DateTime<Utc>,
    pub deleted: bool,
}

impl Record {
    pub fn live(value: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp,
            deleted: false,
        }
    }

    pub fn tombstone(timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Vec::new(),
            timestamp,
            deleted: true,
        }
    }

    /// Last-write-wins ordering. A tombstone beats a live value written at the
    /// same instant; two live values from the same instant are ordered by their
    /// bytes, so every replica settles on the same one.
    pub fn supersedes(&self, other: &Record) -> bool {
        (self.timestamp, self.deleted, &self.value) > (other.timestamp, other.deleted, &other.value)
    }

    /// The value, if this record is not a tombstone.
    pub fn into_value(self) -> Option<Vec<u8>> {
        if self.deleted {
            None
        } else {
            Some(self.value)
        }
    }
}

/// Timestamps travel between nodes and sit in the store as unix microseconds.
pub fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Current time truncated to the microsecond precision the store keeps, so a
/// record compares equal before and after a round trip.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    from_micros(to_micros(now)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn newer_record_supersedes_older() {
        let t = now_micros();
        let old = Record::live(b"a".to_vec(), t);
        let new = Record::live(b"b".to_vec(), t + Duration::milliseconds(1));

        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
    }

    #[test]
    fn tombstone_wins_tie() {
        let t = now_micros();
        let live = Record::live(b"a".to_vec(), t);
        let dead = Record::tombstone(t);

        assert!(dead.supersedes(&live));
        assert!(!live.supersedes(&dead));
    }

    #[test]
    fn equal_live_records_order_by_value() {
        let t = now_micros();
        let a = Record::live(b"a".to_vec(), t);
        let b = Record::live(b"b".to_vec(), t);

        assert!(b.supersedes(&a));
        assert!(!a.supersedes(&b));
        assert!(!a.supersedes(&a.clone()));
    }

    #[test]
    fn tombstone_has_no_value() {
        assert_eq!(Record::tombstone(now_micros()).into_value(), None);
        assert_eq!(
            Record::live(b"v".to_vec(), now_micros()).into_value(),
            Some(b"v".to_vec())
        );
    }

    #[test]
    fn micros_survive_conversion() {
        let t = now_micros();
        assert_eq!(from_micros(to_micros(t)), Some(t));
    }
}
