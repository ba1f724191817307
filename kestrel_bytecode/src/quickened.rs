//! Quickened code layout.
//!
//! A quickened buffer holds cache entries and instructions in one allocation
//! of 8-byte slots. Instructions run upwards from `first_instr`; cache entries
//! run downwards from just below it. Slot 0 holds the cache count so the first
//! instruction can be found from the base.
//!
//! ```text
//! slot 0              <cache_count>
//! slot 1              <cache M-2>
//! ...
//! slot M-1            <cache 0>
//! slot M  (first)     <instr 0> <instr 1> <instr 2> <instr 3>
//! slot M+1            <instr 4> <instr 5> <instr 6> <instr 7>
//! ...
//! ```
//!
//! `M` counts the reserved count slot, so cache `n` lives at slot `M - 1 - n`
//! and the usable caches are `0..M-1`.
//!
//! # Offset relation
//!
//! An instruction that owns caches stores, as its argument, a value from which
//! the first cache index is recomputed at dispatch:
//!
//! ```text
//! offset == (nexti >> 1) + oparg        nexti = index + 1
//! ```
//!
//! About one instruction in four needs a cache and those need about two
//! entries, so `offset ≈ index / 2`; the argument absorbs the difference.

use crate::instruction::CodeUnit;
use std::collections::TryReserveError;

/// Code units per 8-byte slot.
pub const INSTRUCTIONS_PER_ENTRY: usize =
    std::mem::size_of::<u64>() / std::mem::size_of::<CodeUnit>();

/// Code objects longer than this many units are never quickened.
pub const MAX_SIZE_TO_QUICKEN: usize = 5000;

/// Calls before a code object is quickened.
pub const QUICKENING_WARMUP_DELAY: i32 = 8;

/// Warmup value a fresh code object starts at; warmed up at zero.
pub const QUICKENING_INITIAL_WARMUP_VALUE: i32 = -QUICKENING_WARMUP_DELAY;

/// Warmup value marking a code object as permanently excluded.
pub const QUICKENING_WARMUP_COLDEST: i32 = 1;

/// Counter value an adaptive instruction backs off to after a failed
/// specialization attempt.
pub const ADAPTIVE_CACHE_BACKOFF: u8 = 64;

/// Argument that makes `offset_from_oparg_and_nexti` yield `offset`.
#[inline(always)]
#[must_use]
pub const fn oparg_from_offset_and_nexti(offset: i32, nexti: i32) -> i32 {
    offset - (nexti >> 1)
}

/// First cache index owned by the instruction before `nexti`.
#[inline(always)]
#[must_use]
pub const fn offset_from_oparg_and_nexti(oparg: i32, nexti: i32) -> i32 {
    (nexti >> 1) + oparg
}

// =============================================================================
// Cache Entries
// =============================================================================

/// One 8-byte cache slot, read through one of the typed views below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct SpecializedCacheEntry(u64);

impl SpecializedCacheEntry {
    /// The raw 64-bit payload.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Entry zero of a buffer: the cache count.
    #[inline]
    #[must_use]
    pub const fn count(cache_count: i32) -> Self {
        SpecializedCacheEntry(cache_count as u32 as u64)
    }

    /// Read as the cache count.
    #[inline]
    #[must_use]
    pub const fn as_count(self) -> i32 {
        self.0 as u32 as i32
    }

    /// Read as an adaptive entry.
    #[inline]
    #[must_use]
    pub const fn adaptive(self) -> AdaptiveEntry {
        AdaptiveEntry {
            original_oparg: self.0 as u8,
            counter: (self.0 >> 8) as u8,
            index: (self.0 >> 16) as u16,
        }
    }

    /// Read as an attribute cache.
    #[inline]
    #[must_use]
    pub const fn attr(self) -> AttrCache {
        AttrCache {
            tp_version: self.0 as u32,
            dk_version_or_hint: (self.0 >> 32) as u32,
        }
    }

    /// Read as a global-load cache.
    #[inline]
    #[must_use]
    pub const fn load_global(self) -> LoadGlobalCache {
        LoadGlobalCache {
            module_keys_version: self.0 as u32,
            builtin_keys_version: (self.0 >> 32) as u32,
        }
    }

    /// Read as a call cache.
    #[inline]
    #[must_use]
    pub const fn call(self) -> CallCache {
        CallCache {
            func_version: self.0 as u32,
            defaults_start: (self.0 >> 32) as u16,
            defaults_len: (self.0 >> 48) as u16,
        }
    }
}

/// Header entry of every cache-owning instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdaptiveEntry {
    /// The argument the instruction had before quickening.
    pub original_oparg: u8,
    /// Countdown until the next specialization attempt.
    pub counter: u8,
    /// Free-form index used by specialized forms.
    pub index: u16,
}

impl AdaptiveEntry {
    /// Delay the next specialization attempt.
    #[inline]
    pub fn backoff(&mut self) {
        self.counter = ADAPTIVE_CACHE_BACKOFF;
    }
}

impl From<AdaptiveEntry> for SpecializedCacheEntry {
    fn from(e: AdaptiveEntry) -> Self {
        SpecializedCacheEntry(
            u64::from(e.original_oparg) | (u64::from(e.counter) << 8) | (u64::from(e.index) << 16),
        )
    }
}

/// Type and dict-keys versions guarding an attribute access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttrCache {
    /// Version tag of the receiver's type.
    pub tp_version: u32,
    /// Keys version or index hint of the instance dict.
    pub dk_version_or_hint: u32,
}

impl From<AttrCache> for SpecializedCacheEntry {
    fn from(e: AttrCache) -> Self {
        SpecializedCacheEntry(u64::from(e.tp_version) | (u64::from(e.dk_version_or_hint) << 32))
    }
}

/// Keys versions guarding a global load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadGlobalCache {
    /// Keys version of the globals dict.
    pub module_keys_version: u32,
    /// Keys version of the builtins dict.
    pub builtin_keys_version: u32,
}

impl From<LoadGlobalCache> for SpecializedCacheEntry {
    fn from(e: LoadGlobalCache) -> Self {
        SpecializedCacheEntry(
            u64::from(e.module_keys_version) | (u64::from(e.builtin_keys_version) << 32),
        )
    }
}

/// Callee version and defaults window guarding a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallCache {
    /// Version of the cached function.
    pub func_version: u32,
    /// First argument position filled from defaults.
    pub defaults_start: u16,
    /// Number of defaults used.
    pub defaults_len: u16,
}

impl From<CallCache> for SpecializedCacheEntry {
    fn from(e: CallCache) -> Self {
        SpecializedCacheEntry(
            u64::from(e.func_version)
                | (u64::from(e.defaults_start) << 32)
                | (u64::from(e.defaults_len) << 48),
        )
    }
}

// =============================================================================
// Quickened Buffer
// =============================================================================

/// Cache entries and rewritten instructions in one bidirectional buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct QuickenedCode {
    slots: Box<[u64]>,
    instr_count: usize,
}

impl QuickenedCode {
    /// Allocate a buffer for `cache_count` entries (count slot included) and
    /// copy `instructions` into it.
    ///
    /// Fails only if the allocation cannot be satisfied.
    pub fn allocate(
        cache_count: usize,
        instructions: &[CodeUnit],
    ) -> Result<Self, TryReserveError> {
        debug_assert!(cache_count > 0);
        debug_assert!(!instructions.is_empty());
        let total = cache_count + instructions.len().div_ceil(INSTRUCTIONS_PER_ENTRY);
        let mut slots: Vec<u64> = Vec::new();
        slots.try_reserve_exact(total)?;
        slots.resize(total, 0);
        slots[0] = SpecializedCacheEntry::count(cache_count as i32).raw();
        let mut code = QuickenedCode {
            slots: slots.into_boxed_slice(),
            instr_count: instructions.len(),
        };
        for (i, &unit) in instructions.iter().enumerate() {
            code.set_instruction(i, unit);
        }
        Ok(code)
    }

    /// Cache slots including the count slot.
    #[inline]
    #[must_use]
    pub fn cache_count(&self) -> usize {
        SpecializedCacheEntry(self.slots[0]).as_count() as usize
    }

    /// Number of instructions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instr_count
    }

    /// Whether the buffer holds no instructions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instr_count == 0
    }

    /// Total 8-byte slots in the allocation.
    #[inline]
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    /// Slot index of the first instruction.
    #[inline]
    #[must_use]
    pub fn first_instr_slot(&self) -> usize {
        self.cache_count()
    }

    /// Instruction `index`.
    #[inline]
    #[must_use]
    pub fn instruction(&self, index: usize) -> CodeUnit {
        assert!(index < self.instr_count, "instruction index out of range");
        let slot = self.slots[self.first_instr_slot() + index / INSTRUCTIONS_PER_ENTRY];
        let lane = index % INSTRUCTIONS_PER_ENTRY;
        CodeUnit::from_raw((slot >> (16 * lane)) as u16)
    }

    /// Overwrite instruction `index`.
    #[inline]
    pub fn set_instruction(&mut self, index: usize, unit: CodeUnit) {
        assert!(index < self.instr_count, "instruction index out of range");
        let at = self.first_instr_slot() + index / INSTRUCTIONS_PER_ENTRY;
        let shift = 16 * (index % INSTRUCTIONS_PER_ENTRY);
        let mask = 0xFFFFu64 << shift;
        self.slots[at] = (self.slots[at] & !mask) | (u64::from(unit.raw()) << shift);
    }

    /// Iterate over the instructions in order.
    pub fn instructions(&self) -> impl Iterator<Item = CodeUnit> + '_ {
        (0..self.instr_count).map(move |i| self.instruction(i))
    }

    #[inline]
    fn cache_slot(&self, n: usize) -> usize {
        let count = self.cache_count();
        assert!(n + 1 < count, "cache index {n} out of range");
        count - 1 - n
    }

    /// Cache entry `n`.
    #[inline]
    #[must_use]
    pub fn cache(&self, n: usize) -> SpecializedCacheEntry {
        SpecializedCacheEntry(self.slots[self.cache_slot(n)])
    }

    /// Overwrite cache entry `n`.
    #[inline]
    pub fn set_cache(&mut self, n: usize, entry: impl Into<SpecializedCacheEntry>) {
        let slot = self.cache_slot(n);
        self.slots[slot] = entry.into().raw();
    }

    /// First cache index of the instruction at `index`, given its argument.
    #[inline]
    #[must_use]
    pub fn cache_offset_for(index: usize, oparg: u8) -> usize {
        offset_from_oparg_and_nexti(i32::from(oparg), index as i32 + 1) as usize
    }

    /// The adaptive header of the instruction at `index`.
    ///
    /// Only meaningful for instructions quickening gave a cache to.
    #[must_use]
    pub fn adaptive_entry(&self, index: usize) -> AdaptiveEntry {
        let unit = self.instruction(index);
        self.cache(Self::cache_offset_for(index, unit.arg())).adaptive()
    }
}

impl std::fmt::Debug for QuickenedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickenedCode")
            .field("cache_count", &self.cache_count())
            .field("instructions", &self.instr_count)
            .field("total_slots", &self.total_slots())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn units(n: usize) -> Vec<CodeUnit> {
        (0..n)
            .map(|i| CodeUnit::new(Opcode::LoadFast, i as u8))
            .collect()
    }

    #[test]
    fn test_entry_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<SpecializedCacheEntry>(), 8);
        assert_eq!(INSTRUCTIONS_PER_ENTRY, 4);
    }

    #[test]
    fn test_allocation_size() {
        let q = QuickenedCode::allocate(3, &units(9)).unwrap();
        assert_eq!(q.cache_count(), 3);
        assert_eq!(q.total_slots(), 3 + 3);
        let q = QuickenedCode::allocate(1, &units(8)).unwrap();
        assert_eq!(q.total_slots(), 1 + 2);
    }

    #[test]
    fn test_instructions_are_copied() {
        let code = units(7);
        let q = QuickenedCode::allocate(2, &code).unwrap();
        assert_eq!(q.instructions().collect::<Vec<_>>(), code);
    }

    #[test]
    fn test_set_instruction_keeps_neighbours() {
        let code = units(4);
        let mut q = QuickenedCode::allocate(1, &code).unwrap();
        q.set_instruction(1, CodeUnit::new(Opcode::Nop, 0));
        assert_eq!(q.instruction(0), code[0]);
        assert_eq!(q.instruction(1), CodeUnit::new(Opcode::Nop, 0));
        assert_eq!(q.instruction(2), code[2]);
    }

    #[test]
    fn test_cache_entries_grow_downwards() {
        let mut q = QuickenedCode::allocate(3, &units(2)).unwrap();
        q.set_cache(
            0,
            AttrCache {
                tp_version: 7,
                dk_version_or_hint: 9,
            },
        );
        q.set_cache(
            1,
            AttrCache {
                tp_version: 1,
                dk_version_or_hint: 2,
            },
        );
        assert_eq!(q.cache(0).attr().tp_version, 7);
        assert_eq!(q.cache(1).attr().dk_version_or_hint, 2);
        // The count entry is untouched.
        assert_eq!(q.cache_count(), 3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_count_slot_is_not_a_cache() {
        let q = QuickenedCode::allocate(2, &units(1)).unwrap();
        let _ = q.cache(1);
    }

    #[test]
    fn test_typed_views() {
        let adaptive = AdaptiveEntry {
            original_oparg: 200,
            counter: 3,
            index: 513,
        };
        assert_eq!(SpecializedCacheEntry::from(adaptive).adaptive(), adaptive);
        let call = CallCache {
            func_version: 42,
            defaults_start: 1,
            defaults_len: 2,
        };
        assert_eq!(SpecializedCacheEntry::from(call).call(), call);
        let global = LoadGlobalCache {
            module_keys_version: 5,
            builtin_keys_version: 6,
        };
        assert_eq!(SpecializedCacheEntry::from(global).load_global(), global);
    }

    #[test]
    fn test_backoff() {
        let mut entry = AdaptiveEntry::default();
        entry.backoff();
        assert_eq!(entry.counter, ADAPTIVE_CACHE_BACKOFF);
    }

    #[test]
    fn test_offset_relation_inverts() {
        for nexti in 1..64 {
            for offset in (nexti >> 1)..(nexti >> 1) + 10 {
                let oparg = oparg_from_offset_and_nexti(offset, nexti);
                assert_eq!(offset_from_oparg_and_nexti(oparg, nexti), offset);
            }
        }
    }
}
