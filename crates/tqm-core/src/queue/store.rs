use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::naming::alias_from_url;
use crate::transfer::{Transfer, TransferStatus};

/// `{hash, alias}` pair as listed in status snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub hash: String,
    pub alias: String,
}

/// Result of `QueueStore::enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub hash: String,
    /// False when the hash was already known and nothing was added.
    pub created: bool,
}

#[derive(Debug, Default)]
pub struct QueueStore {
    queue: VecDeque<Transfer>,
    active: Option<Transfer>,
    next_order: u64,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transfer. An empty alias is derived from the source URL.
    /// A duplicate hash is a no-op that returns the existing hash.
    pub fn enqueue(&mut self, source: &str, alias: Option<&str>) -> Result<Enqueued, ValidationError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ValidationError::EmptySource);
        }
        let alias = match alias.map(str::trim) {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => alias_from_url(source),
        };
        let transfer = Transfer::new(source, &alias, self.next_order);
        if self.contains(&transfer.hash) {
            return Ok(Enqueued {
                hash: transfer.hash,
                created: false,
            });
        }
        self.next_order += 1;
        let hash = transfer.hash.clone();
        self.queue.push_back(transfer);
        Ok(Enqueued { hash, created: true })
    }

    /// Remove a queued transfer. The Active slot is not touched; its hash is
    /// reported as unknown here.
    pub fn remove(&mut self, hash: &str) -> Result<Transfer, ValidationError> {
        let idx = self
            .position(hash)
            .ok_or_else(|| ValidationError::UnknownHash(hash.to_string()))?;
        self.queue
            .remove(idx)
            .ok_or_else(|| ValidationError::UnknownHash(hash.to_string()))
    }

    /// Reorder the queue. `ordered` must be exactly a permutation of the
    /// queued hashes; otherwise nothing changes.
    pub fn reorder(&mut self, ordered: &[String]) -> Result<(), ValidationError> {
        if ordered.len() != self.queue.len() {
            return Err(ValidationError::NotAPermutation);
        }
        let mut seen = HashSet::with_capacity(ordered.len());
        for hash in ordered {
            if !seen.insert(hash.as_str()) || self.position(hash).is_none() {
                return Err(ValidationError::NotAPermutation);
            }
        }
        let mut old: Vec<Option<Transfer>> = self.queue.drain(..).map(Some).collect();
        for hash in ordered {
            if let Some(t) = old
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|t| &t.hash == hash))
                .and_then(Option::take)
            {
                self.queue.push_back(t);
            }
        }
        Ok(())
    }

    /// Pop the head of the queue into the Active slot, only if the slot is empty.
    pub fn promote_next(&mut self) -> Option<&Transfer> {
        if self.active.is_some() {
            return None;
        }
        let mut next = self.queue.pop_front()?;
        next.status = TransferStatus::Active;
        self.active = Some(next);
        self.active.as_ref()
    }

    /// Move a specific queued transfer into the empty Active slot.
    pub fn promote(&mut self, hash: &str) -> Result<&Transfer, ValidationError> {
        if self.active.is_some() {
            return Err(ValidationError::SlotOccupied);
        }
        let mut next = self.remove(hash)?;
        next.status = TransferStatus::Active;
        self.active = Some(next);
        self.active
            .as_ref()
            .ok_or_else(|| ValidationError::UnknownHash(hash.to_string()))
    }

    /// Clear the Active slot and reinsert its transfer at `position` (clamped
    /// to the queue length), keeping its byte counters. Returns its hash.
    pub fn demote_active_to_queue(&mut self, position: usize) -> Option<String> {
        let mut demoted = self.active.take()?;
        demoted.status = TransferStatus::Queued;
        let hash = demoted.hash.clone();
        let at = position.min(self.queue.len());
        self.queue.insert(at, demoted);
        Some(hash)
    }

    /// Clear the Active slot for a terminal outcome.
    pub fn take_active(&mut self) -> Option<Transfer> {
        self.active.take()
    }

    pub fn active(&self) -> Option<&Transfer> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Transfer> {
        self.active.as_mut()
    }

    pub fn queue(&self) -> impl Iterator<Item = &Transfer> {
        self.queue.iter()
    }

    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.queue
            .iter()
            .map(|t| QueueEntry {
                hash: t.hash.clone(),
                alias: t.alias.clone(),
            })
            .collect()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_count(&self) -> usize {
        usize::from(self.active.is_some())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.active.as_ref().is_some_and(|t| t.hash == hash) || self.position(hash).is_some()
    }

    pub fn is_active(&self, hash: &str) -> bool {
        self.active.as_ref().is_some_and(|t| t.hash == hash)
    }

    /// Every transfer in persisted order: the Active one first (as Queued),
    /// then the queue.
    pub fn persisted(&self) -> Vec<Transfer> {
        let mut out = Vec::with_capacity(self.queue.len() + 1);
        if let Some(active) = &self.active {
            let mut t = active.clone();
            t.status = TransferStatus::Queued;
            out.push(t);
        }
        out.extend(self.queue.iter().cloned());
        out
    }

    /// Replace the queue with previously persisted transfers, in order.
    /// Duplicates are dropped; the Active slot is left empty.
    pub fn restore(&mut self, transfers: Vec<Transfer>) {
        self.queue.clear();
        self.active = None;
        let mut seen = HashSet::new();
        for mut t in transfers {
            if t.status.is_terminal() || !seen.insert(t.hash.clone()) {
                continue;
            }
            t.status = TransferStatus::Queued;
            self.next_order = self.next_order.max(t.enqueue_order + 1);
            self.queue.push_back(t);
        }
    }

    fn position(&self, hash: &str) -> Option<usize> {
        self.queue.iter().position(|t| t.hash == hash)
    }
}
