//! Static-single-assignment naming for trace formulas.
//!
//! Each block of a trace is encoded independently: the instance of program
//! variable `x` with index `k` is the solver variable `x@k`, where index `0`
//! is the value on block entry. Before the blocks of a trace can be
//! conjoined they are shifted onto one shared numbering, so the exit
//! instance of one block is the entry instance of the next.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::terms::SmtTerm;

/// Separator between a variable's base name and its SSA index.
pub const SSA_SEPARATOR: char = '@';

/// Highest SSA index written per variable within one block.
pub type SsaMap = BTreeMap<String, u32>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermError {
    #[error("malformed SSA variable name '{name}'")]
    MalformedSsaName { name: String },
    #[error("trace has {blocks} block formulas but {maps} SSA maps")]
    LengthMismatch { blocks: usize, maps: usize },
    #[error("SSA index of '{base}' overflows after alignment")]
    IndexOverflow { base: String },
}

/// Solver name of instance `index` of `base`.
pub fn ssa_name(base: &str, index: u32) -> String {
    format!("{base}{SSA_SEPARATOR}{index}")
}

/// Split `x@k` into `("x", k)`. Names without a separator are SSA-free.
pub fn split_ssa_name(name: &str) -> Result<Option<(&str, u32)>, TermError> {
    let Some((base, index)) = name.rsplit_once(SSA_SEPARATOR) else {
        return Ok(None);
    };
    if base.is_empty() {
        return Err(TermError::MalformedSsaName {
            name: name.to_string(),
        });
    }
    let index = index
        .parse::<u32>()
        .map_err(|_| TermError::MalformedSsaName {
            name: name.to_string(),
        })?;
    Ok(Some((base, index)))
}

/// Shift every SSA variable of `term` by the per-variable `offsets`.
pub fn shift_ssa_indices(term: &SmtTerm, offsets: &SsaMap) -> Result<SmtTerm, TermError> {
    term.try_rename_variables(&mut |name| match split_ssa_name(name)? {
        None => Ok(name.to_string()),
        Some((base, index)) => {
            let offset = offsets.get(base).copied().unwrap_or(0);
            let shifted = index
                .checked_add(offset)
                .ok_or_else(|| TermError::IndexOverflow {
                    base: base.to_string(),
                })?;
            Ok(ssa_name(base, shifted))
        }
    })
}

/// Rewrite independently numbered block formulas onto one numbering.
///
/// Block `i` is shifted by the sum of the SSA maps of blocks `0..i`. The
/// first block is returned unchanged.
pub fn align_ssa_indices(
    blocks: &[SmtTerm],
    ssa_maps: &[SsaMap],
) -> Result<Vec<SmtTerm>, TermError> {
    if blocks.len() != ssa_maps.len() {
        return Err(TermError::LengthMismatch {
            blocks: blocks.len(),
            maps: ssa_maps.len(),
        });
    }

    let mut offsets = SsaMap::new();
    let mut aligned = Vec::with_capacity(blocks.len());
    for (block, map) in blocks.iter().zip(ssa_maps) {
        if offsets.is_empty() {
            aligned.push(block.clone());
        } else {
            aligned.push(shift_ssa_indices(block, &offsets)?);
        }
        for (var, highest) in map {
            let entry = offsets.entry(var.clone()).or_insert(0);
            *entry = entry
                .checked_add(*highest)
                .ok_or_else(|| TermError::IndexOverflow { base: var.clone() })?;
        }
    }
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(entries: &[(&str, u32)]) -> SsaMap {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn split_recognizes_indexed_and_plain_names() {
        assert_eq!(split_ssa_name("x@3"), Ok(Some(("x", 3))));
        assert_eq!(split_ssa_name("actor::x@0"), Ok(Some(("actor::x", 0))));
        assert_eq!(split_ssa_name("flag"), Ok(None));
        assert!(matches!(
            split_ssa_name("x@y"),
            Err(TermError::MalformedSsaName { .. })
        ));
        assert!(matches!(
            split_ssa_name("@1"),
            Err(TermError::MalformedSsaName { .. })
        ));
    }

    #[test]
    fn single_block_is_left_untouched() {
        let block = SmtTerm::var("x@1").eq(SmtTerm::var("x@0").add(SmtTerm::int(1)));
        let aligned = align_ssa_indices(&[block.clone()], &[map(&[("x", 1)])]).unwrap();
        assert_eq!(aligned, vec![block]);
    }

    #[test]
    fn later_blocks_continue_from_previous_exit_instances() {
        // x := 1 ; assume x == 2
        let blocks = vec![
            SmtTerm::var("x@1").eq(SmtTerm::int(1)),
            SmtTerm::var("x@0").eq(SmtTerm::int(2)),
        ];
        let maps = vec![map(&[("x", 1)]), SsaMap::new()];
        let aligned = align_ssa_indices(&blocks, &maps).unwrap();
        assert_eq!(aligned[1], SmtTerm::var("x@1").eq(SmtTerm::int(2)));
    }

    #[test]
    fn offsets_accumulate_per_variable() {
        let blocks = vec![
            SmtTerm::var("x@2").eq(SmtTerm::var("y@1")),
            SmtTerm::var("y@1").eq(SmtTerm::var("x@0")),
            SmtTerm::var("x@0").lt(SmtTerm::var("y@0")),
        ];
        let maps = vec![map(&[("x", 2), ("y", 1)]), map(&[("y", 1)]), SsaMap::new()];
        let aligned = align_ssa_indices(&blocks, &maps).unwrap();
        assert_eq!(aligned[1], SmtTerm::var("y@2").eq(SmtTerm::var("x@2")));
        assert_eq!(aligned[2], SmtTerm::var("x@2").lt(SmtTerm::var("y@2")));
    }

    #[test]
    fn plain_names_are_never_renamed() {
        let blocks = vec![SmtTerm::bool(true), SmtTerm::var("clock").ge(SmtTerm::int(0))];
        let maps = vec![map(&[("clock", 4)]), SsaMap::new()];
        let aligned = align_ssa_indices(&blocks, &maps).unwrap();
        assert_eq!(aligned[1], blocks[1]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = align_ssa_indices(&[SmtTerm::bool(true)], &[]).unwrap_err();
        assert_eq!(err, TermError::LengthMismatch { blocks: 1, maps: 0 });
    }

    proptest! {
        #[test]
        fn shifted_index_is_entry_index_plus_prefix_sum(
            writes in proptest::collection::vec(0u32..5, 1..6),
            read in 0u32..5,
        ) {
            let mut blocks: Vec<SmtTerm> = writes
                .iter()
                .map(|w| SmtTerm::var(ssa_name("v", *w)).ge(SmtTerm::int(0)))
                .collect();
            blocks.push(SmtTerm::var(ssa_name("v", read)).ge(SmtTerm::int(0)));
            let mut maps: Vec<SsaMap> = writes.iter().map(|w| map(&[("v", *w)])).collect();
            maps.push(SsaMap::new());

            let aligned = align_ssa_indices(&blocks, &maps).unwrap();
            let total: u32 = writes.iter().sum();
            let expected = SmtTerm::var(ssa_name("v", read + total)).ge(SmtTerm::int(0));
            prop_assert_eq!(aligned.last().cloned(), Some(expected));
            prop_assert_eq!(&aligned[0], &blocks[0]);
        }
    }
}
