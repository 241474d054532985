//! Read-through cache over partition snapshots.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::traits::SnapshotSource;
use crate::error::Result;
use crate::jira::partition::PartitionKey;
use crate::jira::types::{project, ProjectedRecord};

/// Projected records of one partition, cheap to hand out to many readers.
pub type Records = Arc<[ProjectedRecord]>;

type Outcome = Result<Records>;

enum Slot {
  Ready(Records),
  /// A load is in flight; the receiver yields its outcome.
  Loading(watch::Receiver<Option<Outcome>>),
}

#[derive(Default)]
struct Slots {
  /// Bumped by `clear_all` so loads started earlier cannot repopulate.
  generation: u64,
  entries: HashMap<PartitionKey, Slot>,
}

/// In-memory cache of projected partitions, filled lazily from a
/// [`SnapshotSource`].
///
/// - Hits take a shared lock only, so cached reads never wait on each other.
/// - A miss registers an in-flight marker and performs the load with no lock
///   held. Concurrent misses for the same partition wait on that marker
///   instead of loading again.
/// - Failed loads are not cached; the next `get` tries again.
/// - Entries live until [`CacheStore::clear_all`].
pub struct CacheStore<S: SnapshotSource> {
  source: Arc<S>,
  slots: Arc<RwLock<Slots>>,
}

impl<S: SnapshotSource> CacheStore<S> {
  pub fn new(source: S) -> Self {
    Self {
      source: Arc::new(source),
      slots: Arc::new(RwLock::new(Slots::default())),
    }
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  // The map is only touched by short non-panicking sections, so a poisoned
  // lock still holds a consistent map.
  fn read_slots(&self) -> RwLockReadGuard<'_, Slots> {
    self.slots.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write_slots(&self) -> RwLockWriteGuard<'_, Slots> {
    self.slots.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Projected records for `partition`, loading the snapshot on a miss.
  pub async fn get(&self, partition: PartitionKey) -> Result<Records> {
    loop {
      let pending = {
        let slots = self.read_slots();
        match slots.entries.get(&partition) {
          Some(Slot::Ready(records)) => {
            debug!(%partition, "cache hit");
            return Ok(records.clone());
          }
          Some(Slot::Loading(rx)) => Some(rx.clone()),
          None => None,
        }
      };

      let mut rx = match pending {
        Some(rx) => rx,
        None => match self.register(partition) {
          Registration::Ready(records) => return Ok(records),
          Registration::Wait(rx) => rx,
          Registration::Lead(in_flight) => return self.load(in_flight).await,
        },
      };

      debug!(%partition, "waiting on in-flight load");
      let shared = match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
      };
      if let Some(outcome) = shared {
        return outcome;
      }
      // The loading caller was dropped before finishing; try again.
    }
  }

  /// Re-check under the write lock and either join an existing load or
  /// become the one performing it.
  fn register(&self, partition: PartitionKey) -> Registration<'_> {
    let mut slots = self.write_slots();
    match slots.entries.get(&partition) {
      Some(Slot::Ready(records)) => Registration::Ready(records.clone()),
      Some(Slot::Loading(rx)) => Registration::Wait(rx.clone()),
      None => {
        let (tx, rx) = watch::channel(None);
        slots.entries.insert(partition, Slot::Loading(rx));
        Registration::Lead(InFlight {
          slots: &self.slots,
          partition,
          generation: slots.generation,
          tx: Some(tx),
        })
      }
    }
  }

  async fn load(&self, in_flight: InFlight<'_>) -> Outcome {
    let partition = in_flight.partition;
    debug!(%partition, "cache miss, loading snapshot");

    let outcome = self
      .source
      .load(partition)
      .await
      .map(|raw| Records::from(project(&raw)));

    if let Err(e) = &outcome {
      debug!(%partition, error = %e, "snapshot load failed");
    }
    in_flight.finish(outcome.clone());
    outcome
  }

  /// Drop every cached partition. Snapshots on disk are untouched.
  pub fn clear_all(&self) {
    let mut slots = self.write_slots();
    slots.entries.clear();
    slots.generation += 1;
    debug!("cache cleared");
  }

  /// Partitions with a snapshot in the backing store. Does not load them.
  pub async fn list_available_partitions(&self) -> Result<BTreeSet<PartitionKey>> {
    self.source.partitions().await
  }

  /// Partitions currently held in memory.
  #[cfg(test)]
  pub fn cached_partitions(&self) -> BTreeSet<PartitionKey> {
    self
      .read_slots()
      .entries
      .iter()
      .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
      .map(|(partition, _)| *partition)
      .collect()
  }

  /// Every available partition in ascending order, concatenated.
  ///
  /// Partitions that fail to load are logged and skipped.
  pub async fn get_all(&self) -> Result<Vec<ProjectedRecord>> {
    let mut all = Vec::new();
    for partition in self.list_available_partitions().await? {
      match self.get(partition).await {
        Ok(records) => all.extend(records.iter().cloned()),
        Err(e) => warn!(%partition, error = %e, "skipping partition"),
      }
    }
    Ok(all)
  }
}

impl<S: SnapshotSource> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
      slots: Arc::clone(&self.slots),
    }
  }
}

enum Registration<'a> {
  Ready(Records),
  Wait(watch::Receiver<Option<Outcome>>),
  Lead(InFlight<'a>),
}

/// Ownership of one in-flight load.
///
/// Dropping it without calling `finish` (the loading future was cancelled)
/// removes the marker, and closing the channel wakes waiters so one of them
/// takes over.
struct InFlight<'a> {
  slots: &'a RwLock<Slots>,
  partition: PartitionKey,
  generation: u64,
  tx: Option<watch::Sender<Option<Outcome>>>,
}

impl InFlight<'_> {
  fn finish(mut self, outcome: Outcome) {
    {
      let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
      if slots.generation == self.generation {
        match &outcome {
          Ok(records) => {
            slots
              .entries
              .insert(self.partition, Slot::Ready(records.clone()));
          }
          Err(_) => {
            slots.entries.remove(&self.partition);
          }
        }
      }
    }
    if let Some(tx) = self.tx.take() {
      tx.send_replace(Some(outcome));
    }
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    if self.tx.is_none() {
      return;
    }
    let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
    if slots.generation == self.generation
      && matches!(slots.entries.get(&self.partition), Some(Slot::Loading(_)))
    {
      slots.entries.remove(&self.partition);
    }
  }
}
