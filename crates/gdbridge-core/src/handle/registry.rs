//! Generational slab of live payload records.

use std::fmt;

use super::{PackedRef, PayloadKind, RawSlots};
use crate::error::HandleError;

/// Per-kind lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub created: u64,
    pub ended: u64,
}

impl KindStats {
    pub fn live(&self) -> u64 {
        self.created - self.ended
    }
}

/// Snapshot of the registry counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    per_kind: [KindStats; PayloadKind::COUNT],
}

impl RegistryStats {
    pub fn kind(&self, kind: PayloadKind) -> KindStats {
        self.per_kind[kind.index()]
    }

    pub fn created(&self) -> u64 {
        self.per_kind.iter().map(|s| s.created).sum()
    }

    pub fn ended(&self) -> u64 {
        self.per_kind.iter().map(|s| s.ended).sum()
    }

    pub fn live(&self) -> u64 {
        self.created() - self.ended()
    }
}

struct Entry {
    generation: u32,
    live: bool,
    kind: PayloadKind,
    slots: RawSlots,
}

/// Slab keyed by assigned index.
///
/// Ending an entry bumps its generation and returns the index to the free
/// list, so a handle that outlived its entry never matches again.
pub struct HandleRegistry {
    entries: Vec<Entry>,
    free_list: Vec<u32>,
    stats: [KindStats; PayloadKind::COUNT],
}

impl HandleRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            stats: [KindStats {
                created: 0,
                ended: 0,
            }; PayloadKind::COUNT],
        }
    }

    pub fn wrap(&mut self, kind: PayloadKind, slots: RawSlots) -> PackedRef {
        self.stats[kind.index()].created += 1;

        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.live = true;
            entry.kind = kind;
            entry.slots = slots;
            PackedRef::new(index, entry.generation, kind)
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(Entry {
                generation: 0,
                live: true,
                kind,
                slots,
            });
            PackedRef::new(index, 0, kind)
        }
    }

    fn live_entry(&self, handle: PackedRef) -> Option<&Entry> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.live && e.generation == handle.generation && e.kind == handle.kind)
    }

    pub fn raw(&self, handle: PackedRef) -> Result<RawSlots, HandleError> {
        self.live_entry(handle)
            .map(|e| e.slots)
            .ok_or_else(|| handle.stale())
    }

    /// Replaces the slots of a live entry, after the engine mutated a copy.
    pub fn store(&mut self, handle: PackedRef, slots: RawSlots) -> Result<(), HandleError> {
        let entry = self
            .entries
            .get_mut(handle.index as usize)
            .filter(|e| e.live && e.generation == handle.generation)
            .ok_or_else(|| handle.stale())?;
        entry.slots = slots;
        Ok(())
    }

    pub fn end(&mut self, handle: PackedRef) -> Result<RawSlots, HandleError> {
        let Some(entry) = self.entries.get_mut(handle.index as usize) else {
            return Err(handle.stale());
        };
        if !entry.live || entry.generation != handle.generation {
            return Err(HandleError::DoubleEnd {
                kind: handle.kind,
                index: handle.index,
            });
        }

        entry.live = false;
        entry.generation = entry.generation.wrapping_add(1);
        let slots = std::mem::take(&mut entry.slots);
        self.free_list.push(handle.index);
        self.stats[handle.kind.index()].ended += 1;
        Ok(slots)
    }

    pub fn is_live(&self, handle: PackedRef) -> bool {
        self.live_entry(handle).is_some()
    }

    /// Rebuilds a handle from a packed token.
    pub fn unpack(&self, token: u64) -> Result<PackedRef, HandleError> {
        let index = token as u32;
        let generation = (token >> 32) as u32;
        let entry = self
            .entries
            .get(index as usize)
            .ok_or(HandleError::UnknownToken(token))?;
        let handle = PackedRef::new(index, generation, entry.kind);
        if entry.live && entry.generation == generation {
            Ok(handle)
        } else {
            Err(handle.stale())
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            per_kind: self.stats,
        }
    }

    pub fn live_handles(&self) -> impl Iterator<Item = PackedRef> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.live)
            .map(|(i, e)| PackedRef::new(i as u32, e.generation, e.kind))
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("entry_count", &self.entries.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_raw_returns_slots() {
        let mut registry = HandleRegistry::new();
        let h = registry.wrap(PayloadKind::String, [7, 0, 0]);
        assert_eq!(registry.raw(h), Ok([7, 0, 0]));
        assert!(registry.is_live(h));
    }

    #[test]
    fn end_succeeds_exactly_once() {
        let mut registry = HandleRegistry::new();
        let h = registry.wrap(PayloadKind::Array, [1, 0, 0]);
        assert_eq!(registry.end(h), Ok([1, 0, 0]));
        assert_eq!(
            registry.end(h),
            Err(HandleError::DoubleEnd {
                kind: PayloadKind::Array,
                index: h.index(),
            })
        );
        assert_eq!(registry.stats().kind(PayloadKind::Array).ended, 1);
    }

    #[test]
    fn reused_index_does_not_revive_old_handle() {
        let mut registry = HandleRegistry::new();
        let old = registry.wrap(PayloadKind::String, [1, 0, 0]);
        registry.end(old).unwrap();
        let new = registry.wrap(PayloadKind::String, [2, 0, 0]);

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert_eq!(
            registry.raw(old),
            Err(HandleError::Stale {
                kind: PayloadKind::String,
                index: old.index(),
                generation: old.generation(),
            })
        );
        assert!(registry.end(old).is_err());
        assert_eq!(registry.raw(new), Ok([2, 0, 0]));
    }

    #[test]
    fn identical_bit_patterns_get_distinct_handles() {
        let mut registry = HandleRegistry::new();
        let a = registry.wrap(PayloadKind::String, [0, 0, 0]);
        let b = registry.wrap(PayloadKind::String, [0, 0, 0]);
        assert_ne!(a, b);
        registry.end(a).unwrap();
        assert!(registry.is_live(b));
    }

    #[test]
    fn pack_and_unpack() {
        let mut registry = HandleRegistry::new();
        registry.wrap(PayloadKind::Dictionary, [3, 0, 0]);
        let h = registry.wrap(PayloadKind::PackedVector3Array, [4, 5, 0]);
        assert_eq!(registry.unpack(h.pack()), Ok(h));

        registry.end(h).unwrap();
        assert!(matches!(registry.unpack(h.pack()), Err(HandleError::Stale { .. })));
        assert_eq!(
            registry.unpack(u64::from(u32::MAX)),
            Err(HandleError::UnknownToken(u64::from(u32::MAX)))
        );
    }

    #[test]
    fn stats_balance_after_matching_ends() {
        let mut registry = HandleRegistry::new();
        let handles: Vec<_> = (0..10)
            .map(|i| registry.wrap(PayloadKind::StringName, [i, 0, 0]))
            .collect();
        assert_eq!(registry.stats().live(), 10);
        for h in handles {
            registry.end(h).unwrap();
        }
        let stats = registry.stats().kind(PayloadKind::StringName);
        assert_eq!(stats.created, stats.ended);
        assert_eq!(registry.live_handles().count(), 0);
    }
}
