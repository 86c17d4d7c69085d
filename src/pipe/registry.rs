// src/pipe/registry.rs

use super::{Pipe, PipeOwner};
use crate::error::SpError;
use crate::transport::TransportPipe;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Identifiers are 31-bit; 0 means "unassigned".
pub const PIPE_ID_MASK: u32 = 0x7fff_ffff;

static GLOBAL_REGISTRY: Lazy<PipeRegistry> = Lazy::new(PipeRegistry::new);

/// The process-wide registry every socket registers its pipes with.
pub fn global() -> &'static PipeRegistry {
  &GLOBAL_REGISTRY
}

/// Table of live pipes keyed by identifier.
///
/// Cloning yields another handle to the same table. Entries are weak so a
/// dropped pipe cannot be kept alive by the registry.
#[derive(Clone)]
pub struct PipeRegistry {
  table: Arc<Mutex<RegistryTable>>,
}

struct RegistryTable {
  by_id: HashMap<u32, Weak<Pipe>>,
  next_id: u32,
  /// Maximum simultaneously live entries.
  capacity: usize,
}

impl PipeRegistry {
  /// Creates a registry whose counter starts at a random point, so identifiers
  /// differ across process restarts.
  pub fn new() -> Self {
    Self::with_seed(rand::random::<u32>())
  }

  pub fn with_seed(seed: u32) -> Self {
    Self::with_capacity(seed, PIPE_ID_MASK as usize)
  }

  pub(crate) fn with_capacity(seed: u32, capacity: usize) -> Self {
    Self {
      table: Arc::new(Mutex::new(RegistryTable {
        by_id: HashMap::new(),
        next_id: seed,
        capacity: capacity.min(PIPE_ID_MASK as usize),
      })),
    }
  }

  /// Wraps `transport` in a new open pipe and assigns it a unique non-zero identifier.
  pub fn register(
    &self,
    transport: Box<dyn TransportPipe>,
    owner: Weak<dyn PipeOwner>,
  ) -> Result<Arc<Pipe>, SpError> {
    let pipe = Arc::new(Pipe::new(transport, owner, self.clone()));

    loop {
      let mut table = self.table.lock();
      let live = table.by_id.len();
      if live >= table.capacity {
        drop(table);
        tracing::error!(live, "Pipe identifier space exhausted");
        return Err(SpError::IdentifiersExhausted { live });
      }

      let candidate = table.next_id & PIPE_ID_MASK;
      table.next_id = table.next_id.wrapping_add(1);
      if candidate == 0 || table.by_id.contains_key(&candidate) {
        continue;
      }

      table.by_id.insert(candidate, Arc::downgrade(&pipe));
      pipe.set_raw_id(candidate);
      drop(table);

      tracing::debug!(pipe_id = candidate, remote = %pipe.remote_addr(), "Pipe registered");
      return Ok(pipe);
    }
  }

  /// Looks up a live pipe. Identifier 0 never matches.
  pub fn lookup(&self, id: u32) -> Option<Arc<Pipe>> {
    if id == 0 {
      return None;
    }
    self.table.lock().by_id.get(&id).and_then(Weak::upgrade)
  }

  /// Removes an entry if present. A still-live pipe reads back identifier 0 afterwards.
  pub fn deregister(&self, id: u32) {
    let removed = {
      let mut table = self.table.lock();
      let removed = table.by_id.remove(&id).and_then(|w| w.upgrade());
      if let Some(pipe) = &removed {
        pipe.set_raw_id(0);
      }
      removed
    };
    // Dropping the upgraded Arc may run Pipe::drop, which takes the lock again.
    drop(removed);
  }

  pub fn len(&self) -> usize {
    self.table.lock().by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Reads a pipe's identifier under the registry lock.
  pub(crate) fn id_of(&self, pipe: &Pipe) -> u32 {
    let _table = self.table.lock();
    pipe.raw_id()
  }

  /// Removes the pipe's entry and zeroes its identifier in one critical section,
  /// so the identifier reads 0 before it can be handed out again.
  pub(crate) fn release(&self, pipe: &Pipe) {
    let mut table = self.table.lock();
    Self::remove_entry(&mut table, pipe);
    pipe.set_raw_id(0);
  }

  /// Drop-path cleanup; the pipe can no longer be upgraded.
  pub(crate) fn forget(&self, pipe: &Pipe) {
    let mut table = self.table.lock();
    Self::remove_entry(&mut table, pipe);
  }

  fn remove_entry(table: &mut RegistryTable, pipe: &Pipe) {
    let id = pipe.raw_id();
    let owned = table
      .by_id
      .get(&id)
      .map_or(false, |entry| std::ptr::eq(entry.as_ptr(), pipe));
    if owned {
      table.by_id.remove(&id);
    }
  }
}

impl Default for PipeRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for PipeRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipeRegistry").field("live", &self.len()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipe::tests::{CountingOwner, MockTransport};
  use std::collections::HashSet;
  use std::thread;

  fn mock() -> Box<dyn TransportPipe> {
    Box::new(MockTransport::default())
  }

  fn no_owner() -> Weak<dyn PipeOwner> {
    Weak::<CountingOwner>::new()
  }

  #[test]
  fn concurrent_registrations_get_distinct_nonzero_ids() {
    let registry = PipeRegistry::new();
    let handles: Vec<_> = (0..10)
      .map(|_| {
        let registry = registry.clone();
        thread::spawn(move || {
          (0..100)
            .map(|_| registry.register(mock(), no_owner()).unwrap())
            .collect::<Vec<_>>()
        })
      })
      .collect();

    let pipes: Vec<Arc<Pipe>> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let ids: HashSet<u32> = pipes.iter().map(|p| p.id()).collect();
    assert_eq!(ids.len(), 1000);
    assert!(!ids.contains(&0));
    assert!(ids.iter().all(|id| *id <= PIPE_ID_MASK));
    assert_eq!(registry.len(), 1000);
  }

  #[test]
  fn counter_wraps_and_skips_zero() {
    let registry = PipeRegistry::with_seed(PIPE_ID_MASK);
    let a = registry.register(mock(), no_owner()).unwrap();
    let b = registry.register(mock(), no_owner()).unwrap();
    assert_eq!(a.id(), PIPE_ID_MASK);
    assert_eq!(b.id(), 1);
  }

  #[test]
  fn occupied_candidates_are_skipped() {
    let registry = PipeRegistry::with_seed(40);
    let first = registry.register(mock(), no_owner()).unwrap();
    assert_eq!(first.id(), 40);

    registry.table.lock().next_id = 40;
    let second = registry.register(mock(), no_owner()).unwrap();
    assert_eq!(second.id(), 41);
  }

  #[test]
  fn full_table_fails_loudly() {
    let registry = PipeRegistry::with_capacity(1, 2);
    let _a = registry.register(mock(), no_owner()).unwrap();
    let _b = registry.register(mock(), no_owner()).unwrap();
    assert!(matches!(
      registry.register(mock(), no_owner()),
      Err(SpError::IdentifiersExhausted { live: 2 })
    ));
  }

  #[test]
  fn lookup_and_deregister() {
    let registry = PipeRegistry::new();
    let pipe = registry.register(mock(), no_owner()).unwrap();
    let id = pipe.id();

    assert!(Arc::ptr_eq(&registry.lookup(id).unwrap(), &pipe));
    assert!(registry.lookup(0).is_none());

    registry.deregister(id);
    assert!(registry.lookup(id).is_none());
    assert_eq!(pipe.id(), 0);
    registry.deregister(id); // absent: no-op
    assert!(registry.is_empty());
  }

  #[test]
  fn dropping_unclosed_pipe_removes_entry() {
    let registry = PipeRegistry::new();
    let pipe = registry.register(mock(), no_owner()).unwrap();
    let id = pipe.id();
    drop(pipe);
    assert!(registry.lookup(id).is_none());
    assert!(registry.is_empty());
  }

  #[tokio::test]
  async fn closed_ids_read_zero_before_reuse() {
    let registry = PipeRegistry::with_seed(7);
    let a = registry.register(mock(), no_owner()).unwrap();
    assert_eq!(a.id(), 7);
    a.close().await.unwrap();
    assert_eq!(a.id(), 0);

    registry.table.lock().next_id = 7;
    let b = registry.register(mock(), no_owner()).unwrap();
    assert_eq!(b.id(), 7);
    assert_eq!(a.id(), 0, "stale handle must not alias the new pipe");
  }

  #[tokio::test]
  async fn closing_some_pipes_leaves_the_rest() {
    let registry = PipeRegistry::new();
    let pipes: Vec<_> = (0..10).map(|_| registry.register(mock(), no_owner()).unwrap()).collect();
    let closed_ids: Vec<u32> = pipes[..4].iter().map(|p| p.id()).collect();
    for p in &pipes[..4] {
      p.close().await.unwrap();
    }
    for id in closed_ids {
      assert!(registry.lookup(id).is_none());
    }
    assert_eq!(registry.len(), 6);
  }

  #[test]
  fn global_registry_is_shared() {
    let a = global().clone();
    let pipe = a.register(mock(), no_owner()).unwrap();
    assert!(global().lookup(pipe.id()).is_some());
  }
}
