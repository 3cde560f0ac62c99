use crate::error::RecoveryError;
use crate::pipeline::{RecoverySource, ReleaseOutcome, RollbackSummary, SourceChunk};
use chrono::{DateTime, Utc};
use dlr_core::{decode_envelope, DeadLetterRecord, EventCategory};
use dlr_storage::QueueStore;
use std::collections::BTreeMap;
use tracing::{debug, error};

pub const LISTENER_LANE: &str = "listener";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub lane: String,
    pub raw: String,
}

/// Pops from the head of each lane in turn. In single-pass mode every lane
/// is popped once; in drain mode a lane is popped again while pages come
/// back full, up to the length it had when first visited so re-pushed
/// messages are not picked up twice in one run.
pub struct QueueSource<'a, Q> {
    store: &'a Q,
    lanes: Vec<String>,
    cursor: usize,
    drain: bool,
    budget: Option<usize>,
    last_lane: Option<String>,
}

impl<'a, Q: QueueStore> QueueSource<'a, Q> {
    pub fn single_pass(store: &'a Q, lanes: Vec<String>) -> Self {
        Self {
            store,
            lanes,
            cursor: 0,
            drain: false,
            budget: None,
            last_lane: None,
        }
    }

    pub fn draining(store: &'a Q, lane: impl Into<String>) -> Self {
        Self {
            store,
            lanes: vec![lane.into()],
            cursor: 0,
            drain: true,
            budget: None,
            last_lane: None,
        }
    }

    /// One lane per event category, named by the category.
    pub fn per_category(store: &'a Q) -> Self {
        let lanes = EventCategory::ALL
            .iter()
            .map(|category| category.as_str().to_string())
            .collect();
        Self::single_pass(store, lanes)
    }

    fn advance(&mut self) {
        self.cursor += 1;
        self.budget = None;
    }
}

impl<Q: QueueStore> RecoverySource for QueueSource<'_, Q> {
    type Handle = QueueMessage;

    fn area(&self) -> String {
        match &self.last_lane {
            Some(lane) => format!("queue:{lane}"),
            None => "queue".to_string(),
        }
    }

    fn next_chunk(&mut self, size: usize) -> Result<SourceChunk<QueueMessage>, RecoveryError> {
        while let Some(lane) = self.lanes.get(self.cursor).cloned() {
            let take = if self.drain {
                let remaining = match self.budget {
                    Some(remaining) => remaining,
                    None => {
                        let len = self
                            .store
                            .queue_len(&lane)
                            .map_err(|err| RecoveryError::unreadable(&lane, err))?;
                        self.budget = Some(len);
                        len
                    }
                };
                remaining.min(size)
            } else {
                size
            };
            if take == 0 {
                self.advance();
                continue;
            }

            let popped = self
                .store
                .pop_top_n(&lane, take)
                .map_err(|err| RecoveryError::unreadable(&lane, err))?;
            debug!(event = "queue_popped", lane = %lane, count = popped.len());

            if self.drain {
                let remaining = self.budget.unwrap_or(0).saturating_sub(popped.len());
                self.budget = Some(remaining);
                if popped.len() < size || remaining == 0 {
                    self.advance();
                }
            } else {
                self.advance();
            }

            if popped.is_empty() {
                continue;
            }
            self.last_lane = Some(lane.clone());
            let items = popped
                .into_iter()
                .map(|raw| QueueMessage {
                    lane: lane.clone(),
                    raw,
                })
                .collect();
            return Ok(SourceChunk {
                items,
                exhausted: self.cursor >= self.lanes.len(),
            });
        }
        Ok(SourceChunk::empty())
    }

    fn load(
        &self,
        handle: &QueueMessage,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord, RecoveryError> {
        let key = decode_envelope(&handle.raw)
            .ok()
            .and_then(|message| message.key);
        Ok(DeadLetterRecord::new(key, handle.raw.clone(), None, now))
    }

    fn release(&mut self, handle: QueueMessage) -> Result<ReleaseOutcome, RecoveryError> {
        self.store.push_back(&handle.lane, &handle.raw)?;
        Ok(ReleaseOutcome::Restored)
    }

    fn mark_completed(
        &mut self,
        _handle: QueueMessage,
        _now: DateTime<Utc>,
    ) -> Result<(), RecoveryError> {
        Ok(())
    }

    fn rollback(&mut self, handles: Vec<QueueMessage>) -> RollbackSummary {
        let mut by_lane: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for handle in handles {
            by_lane.entry(handle.lane).or_default().push(handle.raw);
        }

        let mut summary = RollbackSummary::default();
        for (lane, messages) in by_lane {
            match self.store.push_back_many(&lane, &messages) {
                Ok(()) => summary.restored += messages.len(),
                Err(err) => {
                    summary.failed += messages.len();
                    error!(
                        event = "queue_rollback_failed",
                        lane = %lane,
                        count = messages.len(),
                        error = %err
                    );
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlr_storage::RecoveryStore;

    fn drain_all<Q: QueueStore>(
        source: &mut QueueSource<'_, Q>,
        size: usize,
    ) -> Vec<Vec<String>> {
        let mut pages = Vec::new();
        loop {
            let chunk = source.next_chunk(size).expect("next chunk");
            if chunk.items.is_empty() {
                break;
            }
            pages.push(chunk.items.into_iter().map(|item| item.raw).collect());
            if chunk.exhausted {
                break;
            }
        }
        pages
    }

    #[test]
    fn single_pass_pops_each_lane_once() {
        let store = RecoveryStore::open_in_memory().expect("open db");
        for message in ["p1", "p2", "p3"] {
            store.push_back("POST", message).expect("push");
        }
        store.push_back("COMMENT_LIKE", "cl1").expect("push");

        let mut source = QueueSource::per_category(&store);
        let pages = drain_all(&mut source, 2);

        assert_eq!(pages, vec![vec!["p1", "p2"], vec!["cl1"]]);
        assert_eq!(store.queue_len("POST").expect("len"), 1);
    }

    #[test]
    fn drain_mode_continues_while_pages_are_full() {
        let store = RecoveryStore::open_in_memory().expect("open db");
        for index in 0..5 {
            store
                .push_back(LISTENER_LANE, &format!("m{index}"))
                .expect("push");
        }

        let mut source = QueueSource::draining(&store, LISTENER_LANE);
        let pages = drain_all(&mut source, 2);

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2], vec!["m4"]);
        assert_eq!(store.queue_len(LISTENER_LANE).expect("len"), 0);
    }

    #[test]
    fn drain_mode_does_not_revisit_repushed_messages() {
        let store = RecoveryStore::open_in_memory().expect("open db");
        for index in 0..4 {
            store
                .push_back(LISTENER_LANE, &format!("m{index}"))
                .expect("push");
        }

        let mut source = QueueSource::draining(&store, LISTENER_LANE);
        let first = source.next_chunk(2).expect("first page");
        for item in first.items {
            source.release(item).expect("re-push");
        }
        let pages = drain_all(&mut source, 2);

        assert_eq!(pages, vec![vec!["m2", "m3"]]);
        assert_eq!(store.queue_len(LISTENER_LANE).expect("len"), 2);
    }

    #[test]
    fn rollback_pushes_messages_back_to_tail() {
        let store = RecoveryStore::open_in_memory().expect("open db");
        store.push_back("POST", "a").expect("push");
        store.push_back("POST", "b").expect("push");

        let mut source = QueueSource::per_category(&store);
        let chunk = source.next_chunk(1).expect("chunk");
        let summary = source.rollback(chunk.items);

        assert_eq!(summary.restored, 1);
        assert_eq!(store.pop_top_n("POST", 5).expect("pop"), vec!["b", "a"]);
    }
}
