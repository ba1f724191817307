//! Quickening: rewriting warmed-up code into adaptive form.
//!
//! Quickening copies a code object's instructions into a [`QuickenedCode`]
//! buffer, swaps every specializable instruction for its adaptive variant
//! and gives it cache entries. The adaptive instruction's argument is
//! repurposed to locate its first cache entry, so the original argument is
//! saved in that entry's header.
//!
//! ```text
//! LOAD_ATTR 3            LOAD_ATTR_ADAPTIVE k      cache[off]   = { oparg: 3, counter: 0 }
//!                  ──►                             cache[off+1] = attribute cache
//!                        where off == (nexti >> 1) + k
//! ```
//!
//! Instructions behind an `EXTENDED_ARG` prefix, and instructions whose
//! offset does not fit in one byte, are left as they are.

use crate::config::QuickenConfig;
use crate::error::VmResult;
use kestrel_bytecode::quickened::{
    AdaptiveEntry, QuickenedCode, SpecializedCacheEntry, offset_from_oparg_and_nexti,
    oparg_from_offset_and_nexti,
};
use kestrel_bytecode::{CodeObject, CodeUnit, Opcode};
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// Specialization Tables
// =============================================================================

/// Specializable opcodes, their adaptive variants and cache entry counts.
const FAMILIES: [(Opcode, Opcode, u8); 6] = [
    (Opcode::LoadAttr, Opcode::LoadAttrAdaptive, 2),
    (Opcode::LoadGlobal, Opcode::LoadGlobalAdaptive, 2),
    (Opcode::LoadMethod, Opcode::LoadMethodAdaptive, 3),
    (Opcode::StoreAttr, Opcode::StoreAttrAdaptive, 2),
    (Opcode::CallFunction, Opcode::CallFunctionAdaptive, 2),
    (Opcode::BinarySubscr, Opcode::BinarySubscrAdaptive, 0),
];

const fn build_adaptive_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < FAMILIES.len() {
        table[FAMILIES[i].0 as usize] = FAMILIES[i].1 as u8;
        i += 1;
    }
    table
}

const fn build_cache_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < FAMILIES.len() {
        table[FAMILIES[i].0 as usize] = FAMILIES[i].2;
        i += 1;
    }
    table
}

/// Adaptive variant per opcode byte; 0 where none exists.
pub static ADAPTIVE_OPCODES: [u8; 256] = build_adaptive_table();

/// Cache entries needed per opcode byte.
pub static CACHE_REQUIREMENTS: [u8; 256] = build_cache_table();

/// The adaptive variant of `opcode`, if it has one.
#[inline]
#[must_use]
pub fn adaptive_opcode(opcode: Opcode) -> Option<Opcode> {
    match ADAPTIVE_OPCODES[opcode as usize] {
        0 => None,
        adaptive => Opcode::from_u8(adaptive),
    }
}

/// Cache entries the adaptive form of `opcode` uses.
#[inline]
#[must_use]
pub fn cache_requirement(opcode: Opcode) -> usize {
    usize::from(CACHE_REQUIREMENTS[opcode.base() as usize])
}

static QUICKENED_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Code objects quickened by this process.
pub fn quickened_count() -> usize {
    QUICKENED_COUNT.load(Ordering::Relaxed)
}

// =============================================================================
// Cache Layout
// =============================================================================

/// Number of cache slots `instructions` needs, count slot included.
///
/// Instructions behind an `EXTENDED_ARG` prefix are never specialized and
/// get nothing.
pub fn entries_needed(instructions: &[CodeUnit]) -> usize {
    let mut cache_offset: i32 = 0;
    let mut previous = Opcode::Nop as u8;
    for (i, unit) in instructions.iter().enumerate() {
        let opcode = unit.opcode_byte();
        if previous != Opcode::ExtendedArg as u8 {
            oparg_for_instruction(i, opcode, 0, &mut cache_offset);
        }
        previous = opcode;
    }
    cache_offset as usize + 1
}

/// Argument for the instruction at `index`, advancing `cache_offset` past
/// the caches it takes. `None` when the offset no longer fits an argument.
fn oparg_for_instruction(
    index: usize,
    opcode: u8,
    original_oparg: u8,
    cache_offset: &mut i32,
) -> Option<u8> {
    let need = i32::from(CACHE_REQUIREMENTS[opcode as usize]);
    if need == 0 {
        return Some(original_oparg);
    }
    let nexti = index as i32 + 1;
    let mut oparg = oparg_from_offset_and_nexti(*cache_offset, nexti);
    if oparg < 0 {
        oparg = 0;
        *cache_offset = offset_from_oparg_and_nexti(0, nexti);
    } else if oparg > 255 {
        return None;
    }
    *cache_offset += need;
    Some(oparg as u8)
}

/// Rewrite specializable instructions in place and seed their caches.
fn optimize(quickened: &mut QuickenedCode) {
    let mut cache_offset: i32 = 0;
    let mut previous = Opcode::Nop as u8;
    for i in 0..quickened.len() {
        let unit = quickened.instruction(i);
        let opcode = unit.opcode_byte();
        let adaptive = ADAPTIVE_OPCODES[opcode as usize];
        if adaptive != 0 && previous != Opcode::ExtendedArg as u8 {
            let original_oparg = unit.arg();
            match oparg_for_instruction(i, opcode, original_oparg, &mut cache_offset) {
                None => previous = opcode,
                Some(new_oparg) => {
                    let adaptive =
                        Opcode::from_u8(adaptive).expect("adaptive table names a real opcode");
                    quickened.set_instruction(i, CodeUnit::new(adaptive, new_oparg));
                    previous = adaptive as u8;
                    let need = i32::from(CACHE_REQUIREMENTS[opcode as usize]);
                    if need > 0 {
                        let entry = AdaptiveEntry {
                            original_oparg,
                            counter: 0,
                            index: 0,
                        };
                        quickened.set_cache((cache_offset - need) as usize, entry);
                    }
                }
            }
        } else {
            previous = opcode;
        }
    }
    debug_assert_eq!(cache_offset as usize + 1, quickened.cache_count());
}

// =============================================================================
// Entry Points
// =============================================================================

/// Quicken `code` unless it already is or is too large.
///
/// All or nothing: on allocation failure the code object is untouched.
pub fn quicken(code: &CodeObject, config: &QuickenConfig) -> VmResult<()> {
    if code.is_quickened() {
        return Ok(());
    }
    let len = code.len();
    if len == 0 || len > config.max_size {
        code.mark_coldest();
        debug!(
            "{}: {} instructions, excluded from quickening",
            code.name(),
            len
        );
        return Ok(());
    }
    let entries = entries_needed(code.instructions());
    let mut quickened = QuickenedCode::allocate(entries, code.instructions())?;
    QUICKENED_COUNT.fetch_add(1, Ordering::Relaxed);
    optimize(&mut quickened);
    let installed = code.install_quickened(quickened);
    debug_assert!(installed.is_ok());
    debug!(
        "{}: quickened {} instructions with {} cache entries",
        code.name(),
        len,
        entries - 1
    );
    Ok(())
}

/// Count one call of `code`, quickening it once it is warm.
///
/// Returns whether this call quickened the code.
pub fn warmup_tick(code: &CodeObject, config: &QuickenConfig) -> VmResult<bool> {
    if !config.enabled || code.is_quickened() || code.is_coldest() {
        return Ok(false);
    }
    code.increment_warmup();
    if !code.is_warmed_up() {
        return Ok(false);
    }
    quicken(code, config)?;
    Ok(code.is_quickened())
}

/// Header entry of the adaptive instruction at `index`.
///
/// `None` unless quickening gave that instruction a cache.
pub fn adaptive_cache(code: &CodeObject, index: usize) -> Option<AdaptiveEntry> {
    cache_entry(code, index, 0).map(SpecializedCacheEntry::adaptive)
}

/// Cache entry `k` of the adaptive instruction at `index`.
pub fn cache_entry(code: &CodeObject, index: usize, k: usize) -> Option<SpecializedCacheEntry> {
    let quickened = code.quickened()?;
    let unit = quickened.instruction(index);
    let opcode = unit.opcode()?;
    if !opcode.is_adaptive() || k >= cache_requirement(opcode) {
        return None;
    }
    Some(quickened.cache(QuickenedCode::cache_offset_for(index, unit.arg()) + k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_bytecode::CodeBuilder;

    fn build(f: impl FnOnce(&mut CodeBuilder)) -> CodeObject {
        let mut b = CodeBuilder::new("f");
        f(&mut b);
        b.emit(Opcode::ReturnValue);
        b.finish()
    }

    #[test]
    fn test_tables() {
        assert_eq!(adaptive_opcode(Opcode::LoadAttr), Some(Opcode::LoadAttrAdaptive));
        assert_eq!(adaptive_opcode(Opcode::LoadFast), None);
        assert_eq!(cache_requirement(Opcode::LoadMethod), 3);
        assert_eq!(cache_requirement(Opcode::LoadMethodAdaptive), 3);
        assert_eq!(cache_requirement(Opcode::BinarySubscr), 0);
        for (base, adaptive, _) in FAMILIES {
            assert_eq!(adaptive.base(), base);
            assert!(adaptive.is_adaptive());
        }
    }

    #[test]
    fn test_entries_needed_without_caches() {
        let code = build(|b| {
            b.emit_arg(Opcode::LoadConst, 0);
        });
        assert_eq!(entries_needed(code.instructions()), 1);
    }

    #[test]
    fn test_entries_needed_counts_families() {
        let code = build(|b| {
            b.emit_arg(Opcode::LoadGlobal, 0);
            b.emit_arg(Opcode::LoadAttr, 1);
        });
        // LOAD_GLOBAL at 0 takes caches 0..2, LOAD_ATTR at 1 takes 2..4.
        assert_eq!(entries_needed(code.instructions()), 5);
    }

    #[test]
    fn test_quicken_rewrites_and_seeds_cache() {
        let code = build(|b| {
            b.emit_arg(Opcode::LoadGlobal, 7);
            b.emit_arg(Opcode::LoadAttr, 3);
            b.emit(Opcode::BinarySubscr);
        });
        quicken(&code, &QuickenConfig::default()).unwrap();
        let q = code.quickened().unwrap();
        assert_eq!(q.instruction(0).opcode(), Some(Opcode::LoadGlobalAdaptive));
        assert_eq!(q.instruction(1).opcode(), Some(Opcode::LoadAttrAdaptive));
        assert_eq!(q.instruction(2).opcode(), Some(Opcode::BinarySubscrAdaptive));
        assert_eq!(adaptive_cache(&code, 0).unwrap().original_oparg, 7);
        assert_eq!(adaptive_cache(&code, 1).unwrap().original_oparg, 3);
        assert_eq!(adaptive_cache(&code, 1).unwrap().counter, 0);
        assert!(adaptive_cache(&code, 2).is_none());
        assert!(adaptive_cache(&code, 3).is_none());
    }

    #[test]
    fn test_extended_arg_is_not_specialized() {
        let code = build(|b| {
            b.emit_arg(Opcode::LoadAttr, 300);
        });
        quicken(&code, &QuickenConfig::default()).unwrap();
        let q = code.quickened().unwrap();
        assert!(q.instruction(0).is_extended_arg());
        assert_eq!(q.instruction(1).opcode(), Some(Opcode::LoadAttr));
        assert!(adaptive_cache(&code, 1).is_none());
    }

    #[test]
    fn test_far_cache_offsets_are_left_unspecialized() {
        let code = build(|b| {
            for i in 0..300 {
                b.emit_arg(Opcode::LoadMethod, i % 200);
            }
        });
        quicken(&code, &QuickenConfig::default()).unwrap();
        let q = code.quickened().unwrap();
        let original = code.instructions();
        let (mut specialized, mut skipped) = (0, 0);
        for i in 0..300 {
            let unit = q.instruction(i);
            if unit.opcode() == Some(Opcode::LoadMethodAdaptive) {
                specialized += 1;
                let entry = adaptive_cache(&code, i).unwrap();
                assert_eq!(entry.original_oparg, original[i].arg());
                assert_eq!(entry.counter, 0);
            } else {
                skipped += 1;
                assert_eq!(unit, original[i]);
                assert!(adaptive_cache(&code, i).is_none());
            }
        }
        assert_eq!(specialized, 136);
        assert_eq!(skipped, 164);
        assert_eq!(q.cache_count(), 136 * 3 + 1);
    }

    #[test]
    fn test_quicken_is_idempotent() {
        let code = build(|b| {
            b.emit_arg(Opcode::LoadAttr, 1);
        });
        quicken(&code, &QuickenConfig::default()).unwrap();
        let first = code.quickened().cloned();
        quicken(&code, &QuickenConfig::default()).unwrap();
        assert_eq!(code.quickened().cloned(), first);
    }

    #[test]
    fn test_oversized_code_is_marked_coldest() {
        let code = build(|b| {
            for _ in 0..20 {
                b.emit_arg(Opcode::LoadAttr, 0);
            }
        });
        let config = QuickenConfig {
            max_size: 10,
            ..Default::default()
        };
        quicken(&code, &config).unwrap();
        assert!(!code.is_quickened());
        assert!(code.is_coldest());
    }

    #[test]
    fn test_warmup_tick_quickens_on_eighth_call() {
        let code = build(|b| {
            b.emit_arg(Opcode::LoadAttr, 0);
        });
        let config = QuickenConfig::default();
        for _ in 0..7 {
            assert!(!warmup_tick(&code, &config).unwrap());
        }
        assert!(warmup_tick(&code, &config).unwrap());
        assert!(code.is_quickened());
        assert!(!warmup_tick(&code, &config).unwrap());
    }

    #[test]
    fn test_warmup_tick_disabled() {
        let code = build(|_| {});
        let config = QuickenConfig::disabled();
        for _ in 0..20 {
            assert!(!warmup_tick(&code, &config).unwrap());
        }
        assert!(!code.is_quickened());
    }

    #[test]
    fn test_quickened_count_advances() {
        let before = quickened_count();
        let code = build(|_| {});
        quicken(&code, &QuickenConfig::default()).unwrap();
        assert!(quickened_count() > before);
    }
}
