use std::collections::HashSet;

use tracing::{debug, trace};

use council_core::{Message, MessageId};

/// A ledger slot: the message plus its cached sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerEntry {
    pub message: Message,
    /// Microsecond timestamp, `None` when the timestamp did not parse.
    pub sort_key: Option<i64>,
    /// Arrival order, used as the tie-break among equal timestamps.
    pub seq: u64,
}

impl LedgerEntry {
    pub fn has_valid_timestamp(&self) -> bool {
        self.sort_key.is_some()
    }
}

/// Outcome of [`MessageLedger::ingest`].
#[derive(Clone, Debug, PartialEq)]
pub enum Ingested {
    /// New message, placed at `position`. Carries the tail notice.
    Accepted { position: usize, notice: Message },
    /// Id already present; nothing changed.
    Duplicate,
}

impl Ingested {
    /// The message to hand to the scheduler, if any.
    pub fn notice(self) -> Option<Message> {
        match self {
            Self::Accepted { notice, .. } => Some(notice),
            Self::Duplicate => None,
        }
    }
}

/// Deduplicated, timestamp-ordered conversation history.
///
/// Messages with parseable timestamps are kept in ascending order, with ties
/// in arrival order. A message whose timestamp does not parse is appended and
/// then acts as a fixed point: later arrivals are never moved in front of it.
#[derive(Debug, Default)]
pub struct MessageLedger {
    entries: Vec<LedgerEntry>,
    seen: HashSet<MessageId>,
    next_seq: u64,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `message` unless its id is already known.
    ///
    /// Accepted messages always produce a notice carrying the ingested
    /// message, even when it lands mid-ledger.
    pub fn ingest(&mut self, message: Message) -> Ingested {
        if self.seen.contains(&message.id) {
            trace!(id = %message.id, "duplicate message ignored");
            return Ingested::Duplicate;
        }

        let sort_key = message.sort_key();
        let position = match sort_key {
            Some(key) => self.insertion_point(key),
            None => {
                debug!(id = %message.id, timestamp = %message.timestamp, "unparseable timestamp, appending");
                self.entries.len()
            }
        };

        self.seen.insert(message.id.clone());
        let entry = LedgerEntry {
            message: message.clone(),
            sort_key,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(position, entry);

        Ingested::Accepted {
            position,
            notice: message,
        }
    }

    /// Walk back from the tail past entries strictly later than `key`.
    fn insertion_point(&self, key: i64) -> usize {
        let mut position = self.entries.len();
        while position > 0 {
            match self.entries[position - 1].sort_key {
                Some(existing) if existing > key => position -= 1,
                _ => break,
            }
        }
        position
    }

    /// Drop every entry and forget every id.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
        self.next_seq = 0;
    }

    pub fn snapshot(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last().map(|e| &e.message)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, ts: &str) -> Message {
        Message::new(id, ts, "Scribe", format!("body of {id}"))
    }

    fn ids(ledger: &MessageLedger) -> Vec<&str> {
        ledger.snapshot().iter().map(|e| e.message.id.as_str()).collect()
    }

    const T1: &str = "2024-05-01T12:00:01Z";
    const T2: &str = "2024-05-01T12:00:02Z";
    const T3: &str = "2024-05-01T12:00:03Z";

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let mut ledger = MessageLedger::new();
        ledger.ingest(msg("c", T3));
        ledger.ingest(msg("a", T1));
        ledger.ingest(msg("b", T2));
        assert_eq!(ids(&ledger), vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let mut ledger = MessageLedger::new();
        assert!(ledger.ingest(msg("a", T1)).notice().is_some());

        let mut again = msg("a", T2);
        again.content = "different body".into();
        assert_eq!(ledger.ingest(again), Ingested::Duplicate);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.snapshot()[0].message.content, "body of a");
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut ledger = MessageLedger::new();
        ledger.ingest(msg("first", T2));
        ledger.ingest(msg("second", T2));
        ledger.ingest(msg("early", T1));
        ledger.ingest(msg("third", T2));
        assert_eq!(ids(&ledger), vec!["early", "first", "second", "third"]);
    }

    #[test]
    fn mixed_timestamp_formats_order_by_instant() {
        let mut ledger = MessageLedger::new();
        ledger.ingest(msg("offset", "2024-05-01T14:00:02+02:00"));
        ledger.ingest(msg("naive", "2024-05-01 12:00:01.500"));
        assert_eq!(ids(&ledger), vec!["naive", "offset"]);
    }

    #[test]
    fn mid_ledger_insert_still_notifies_with_ingested_message() {
        let mut ledger = MessageLedger::new();
        ledger.ingest(msg("a", T1));
        ledger.ingest(msg("c", T3));

        match ledger.ingest(msg("b", T2)) {
            Ingested::Accepted { position, notice } => {
                assert_eq!(position, 1);
                assert_eq!(notice.id.as_str(), "b");
            }
            Ingested::Duplicate => panic!("b is new"),
        }
        assert_eq!(ledger.last().map(|m| m.id.as_str()), Some("c"));
    }

    #[test]
    fn unparseable_timestamps_append_and_stay_put() {
        let mut ledger = MessageLedger::new();
        ledger.ingest(msg("a", T2));
        ledger.ingest(msg("junk", "yesterday-ish"));
        ledger.ingest(msg("early", T1));
        ledger.ingest(msg("late", T3));

        // "early" cannot move in front of the unparseable entry.
        assert_eq!(ids(&ledger), vec!["a", "junk", "early", "late"]);
        assert!(!ledger.snapshot()[1].has_valid_timestamp());
        assert!(ledger.snapshot()[2].has_valid_timestamp());
    }

    #[test]
    fn clear_forgets_ids() {
        let mut ledger = MessageLedger::new();
        ledger.ingest(msg("a", T1));
        ledger.ingest(msg("b", T2));
        ledger.clear();

        assert!(ledger.is_empty());
        assert!(!ledger.contains(&MessageId::from_raw("a")));
        assert!(ledger.ingest(msg("a", T1)).notice().is_some());
        assert_eq!(ledger.snapshot()[0].seq, 0);
    }
}
