// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode-order simulation of the declared GOP pattern.
//!
//! The simulation walks pictures in decoding order and proves that every
//! reference each picture declares is resolvable at that position. Pictures
//! whose references fall before the first intra picture cannot use their
//! declared RPS as-is; for those an extra RPS entry is synthesized from
//! whatever decoded pictures actually are available. The walk ends once
//! every cycle position has been verified at least once, at which point the
//! pattern is provably repeatable for the rest of the sequence.

use log::debug;
use thiserror::Error;

use crate::gop::ConfigViolation;
use crate::gop::GopConfig;
use crate::gop::GopEntry;
use crate::gop::InterRpsSignaling;
use crate::inter_rps;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("invalid GOP configuration: {}", format_violations(.0))]
    InvalidConfiguration(Vec<ConfigViolation>),
    #[error("found fewer reference picture sets than the GOP size")]
    IncompleteGopPattern,
    #[error(
        "reference picture with POC delta {delta} is not available for GOP frame {}",
        .gop_index + 1
    )]
    DanglingReference { delta: i32, gop_index: usize },
    #[error("GOP structure could not be verified within {limit} synthesized reference picture sets")]
    UnresolvableGopStructure { limit: usize },
}

fn format_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The decoded pictures still usable as references at the current decoding
/// position. HEVC keeps a picture alive only while the most recently
/// decoded picture lists it (or is it), so this is a small rolling set
/// rebuilt after every simulated picture.
#[derive(Default)]
struct AvailablePictures {
    pocs: Vec<i32>,
}

impl AvailablePictures {
    fn contains(&self, poc: i32) -> bool {
        self.pocs.iter().any(|&p| p == poc)
    }

    /// Replaces the set with the pictures `entry` (just decoded at
    /// `cur_poc`) keeps referenced, plus `entry` itself.
    fn reset_from(&mut self, entry: &GopEntry, cur_poc: i32) {
        self.pocs.clear();
        for &delta in &entry.reference_deltas {
            let abs_poc = cur_poc + delta;
            if abs_poc >= 0 {
                self.pocs.push(abs_poc);
            }
        }
        self.pocs.push(cur_poc);
    }
}

/// The verified pattern: the declared entries (usage flags and reference
/// marks filled in) followed by `extra_count` synthesized entries whose
/// `poc_offset` holds an absolute POC.
pub(crate) struct GopTable {
    pub entries: Vec<GopEntry>,
    pub extra_count: usize,
}

/// Simulates decoding order over `entries` (already padded to `gop_size`)
/// until every cycle position verifies, synthesizing extra entries for
/// positions whose references precede the sequence start.
pub(crate) fn verify_and_synthesize(
    config: &GopConfig,
    mut entries: Vec<GopEntry>,
) -> Result<GopTable, CompileError> {
    let gop_size = config.gop_size;
    let mut available = AvailablePictures { pocs: vec![0] };
    let mut verified = vec![false; gop_size];
    let mut num_verified = 0;
    let mut extra_count = 0;

    // Decoding-order counter; position k covers cycle (k-1)/gop_size,
    // cycle slot (k-1)%gop_size.
    let mut check_gop: usize = 1;

    while num_verified < gop_size {
        let slot = (check_gop - 1) % gop_size;
        let cycle = (check_gop - 1) / gop_size;
        if entries[slot].poc_offset < 0 {
            return Err(CompileError::IncompleteGopPattern);
        }
        let cur_poc = (cycle * gop_size) as i32 + entries[slot].poc_offset;
        let cur_tid = entries[slot].temporal_id;

        // Resolve every reference: either it is available, or it precedes
        // the first intra picture and may still exist in later cycles.
        let mut before_first_intra = false;
        let deltas = entries[slot].reference_deltas.clone();
        for (i, &delta) in deltas.iter().enumerate() {
            let abs_poc = cur_poc + delta;
            if abs_poc < 0 {
                before_first_intra = true;
                continue;
            }
            if !available.contains(abs_poc) {
                return Err(CompileError::DanglingReference { delta, gop_index: slot });
            }
            // Mark the cycle position that produces this POC and record
            // whether the current picture may use it: only references whose
            // temporal id does not exceed the current one are usable.
            for k in 0..gop_size {
                if abs_poc % gop_size as i32 == entries[k].poc_offset % gop_size as i32 {
                    let usable = entries[k].temporal_id <= cur_tid;
                    entries[k].is_referenced = true;
                    entries[slot].used_by_curr[i] = usable;
                }
            }
        }

        if !before_first_intra {
            if !verified[slot] {
                verified[slot] = true;
                num_verified += 1;
                debug!("verified GOP position {} at POC {}", slot + 1, cur_poc);
            }
            available.reset_from(&entries[slot], cur_poc);
        } else {
            if extra_count == config.max_extra_rps {
                return Err(CompileError::UnresolvableGopStructure {
                    limit: config.max_extra_rps,
                });
            }
            let synth = synthesize_entry(
                &mut entries,
                gop_size,
                extra_count,
                slot,
                check_gop,
                cur_poc,
                &available,
            );
            debug!(
                "synthesized RPS for POC {} with {} references{}",
                cur_poc,
                synth.reference_deltas.len(),
                if synth.partial_synthesis { " (partial)" } else { "" }
            );
            available.reset_from(&synth, cur_poc);
            entries.push(synth);
            extra_count += 1;
        }

        check_gop += 1;
    }

    Ok(GopTable { entries, extra_count })
}

/// Builds a replacement entry for `slot` at `cur_poc`: keeps the declared
/// references that resolve to POC >= 0, then walks backward through prior
/// decoding positions (closest first) collecting available lower-layer
/// pictures until the requested active-reference count is reached or the
/// candidates run out.
fn synthesize_entry(
    entries: &mut Vec<GopEntry>,
    gop_size: usize,
    extra_count: usize,
    slot: usize,
    check_gop: usize,
    cur_poc: i32,
    available: &AvailablePictures,
) -> GopEntry {
    let cur_tid = entries[slot].temporal_id;
    let mut synth = entries[slot].clone();
    synth.reference_deltas.clear();
    synth.used_by_curr.clear();

    for (i, &delta) in entries[slot].reference_deltas.iter().enumerate() {
        if cur_poc + delta >= 0 {
            synth.reference_deltas.push(delta);
            synth.used_by_curr.push(entries[slot].used_by_curr[i]);
        }
    }

    for back in 1..check_gop {
        let pos = check_gop - 1 - back;
        let off_slot = pos % gop_size;
        let off_poc = (pos / gop_size * gop_size) as i32 + entries[off_slot].poc_offset;

        if off_poc >= 0 && entries[off_slot].temporal_id <= cur_tid {
            let off_delta = off_poc - cur_poc;
            if available.contains(off_poc) && !synth.reference_deltas.contains(&off_delta) {
                entries[off_slot].is_referenced = true;

                // Keep the list in descending-delta order: new negatives go
                // before any smaller negative and before all positives.
                let insert_at = synth
                    .reference_deltas
                    .iter()
                    .position(|&d| d < off_delta || d > 0)
                    .unwrap_or(synth.reference_deltas.len());
                synth.reference_deltas.insert(insert_at, off_delta);
                synth.used_by_curr.insert(insert_at, true);
            }
        }

        if synth.reference_deltas.len() >= synth.num_ref_pics_active {
            break;
        }
    }

    synth.poc_offset = cur_poc;
    synth.partial_synthesis = synth.reference_deltas.len() < synth.num_ref_pics_active;
    synth.inter_rps = if extra_count == 0 {
        // The first synthesized RPS has no predecessor to predict from.
        InterRpsSignaling::None
    } else {
        let pred = &entries[gop_size + extra_count - 1];
        let (delta_rps, ref_idc) = inter_rps::derive_ref_idc(pred, &synth);
        InterRpsSignaling::Explicit { delta_rps, ref_idc }
    };

    synth
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compile;
    use crate::gop::DecodingRefreshType;
    use crate::gop::SliceType;

    fn entry(poc_offset: i32, temporal_id: u8, deltas: &[i32], active: usize) -> GopEntry {
        GopEntry {
            poc_offset,
            slice_type: SliceType::B,
            temporal_id,
            num_ref_pics_active: active,
            reference_deltas: deltas.to_vec(),
            ..Default::default()
        }
    }

    /// The classic 8-picture hierarchical random-access pattern, temporal
    /// ids 0..3, with cross-GOP references.
    pub(crate) fn hierarchical_gop8() -> GopConfig {
        GopConfig {
            gop_size: 8,
            intra_period: -1,
            decoding_refresh_type: DecodingRefreshType::None,
            max_temporal_layers: 4,
            max_extra_rps: 8,
            entries: vec![
                entry(8, 0, &[-8, -10, -12, -16], 4),
                entry(4, 1, &[-4, -6, 4], 2),
                entry(2, 2, &[-2, -4, 2, 6], 2),
                entry(1, 3, &[-1, 1, 3, 7], 2),
                entry(3, 3, &[-1, -3, 1, 5], 2),
                entry(6, 2, &[-2, -4, -6, 2], 2),
                entry(5, 3, &[-1, -5, 1, 3], 2),
                entry(7, 3, &[-1, -3, -7, 1], 2),
            ],
        }
    }

    #[test]
    fn hierarchical_gop8_synthesizes_leading_entries() {
        let _ = env_logger::try_init();
        let compiled = compile(&hierarchical_gop8()).unwrap();

        // The first cycle references pictures before POC 0 at positions 8,
        // 4 and 2; each gets a patched-up RPS appended past the pattern.
        assert_eq!(compiled.extra_rps_count, 3);
        let synth: Vec<&GopEntry> = compiled.entries[8..].iter().collect();
        assert_eq!(synth[0].poc_offset, 8);
        assert_eq!(synth[1].poc_offset, 4);
        assert_eq!(synth[2].poc_offset, 2);

        assert_eq!(synth[0].reference_deltas, vec![-8]);
        assert_eq!(synth[1].reference_deltas, vec![-4, 4]);
        assert_eq!(synth[2].reference_deltas, vec![-2, 2, 6]);

        // POC 8 asked for 4 active references but only the intra picture
        // existed at that point.
        assert!(synth[0].partial_synthesis);
        assert!(!synth[1].partial_synthesis);
        assert!(!synth[2].partial_synthesis);

        assert_eq!(compiled.max_temporal_layer, 4);
    }

    #[test]
    fn hierarchical_gop8_marks_referenced_entries() {
        let compiled = compile(&hierarchical_gop8()).unwrap();

        let referenced: Vec<bool> = compiled.entries[..8]
            .iter()
            .map(|e| e.is_referenced)
            .collect();
        // POCs 8, 4, 2 and 6 are referenced by later pictures; the odd
        // (highest-layer) positions are not.
        assert_eq!(
            referenced,
            vec![true, true, true, false, false, true, false, false]
        );
    }

    #[test]
    fn usage_flags_follow_temporal_ordering() {
        let compiled = compile(&hierarchical_gop8()).unwrap();

        // POC 16 (temporal id 0) may not use the id-1/id-2 pictures at
        // POC 6 and POC 4 even though they are resident.
        assert_eq!(
            compiled.entries[0].used_by_curr,
            vec![true, false, false, true]
        );
        // POC 12 (temporal id 1) likewise cannot use the id-2 picture.
        assert_eq!(compiled.entries[1].used_by_curr, vec![true, false, true]);
        assert_eq!(
            compiled.entries[2].used_by_curr,
            vec![true, true, true, true]
        );
    }

    #[test]
    fn rps_list_is_closed_and_sorted() {
        let compiled = compile(&hierarchical_gop8()).unwrap();

        assert_eq!(compiled.rps_list.len(), compiled.entries.len());
        for (entry, rps) in compiled.entries.iter().zip(&compiled.rps_list) {
            assert_eq!(rps.num_pictures(), entry.reference_deltas.len());

            let pics = rps.pictures();
            let (neg, pos) = pics.split_at(rps.num_negative_pics());
            assert!(neg.iter().all(|p| p.delta_poc <= 0));
            assert!(pos.iter().all(|p| p.delta_poc > 0));
            assert!(neg.windows(2).all(|w| w[0].delta_poc > w[1].delta_poc));
            assert!(pos.windows(2).all(|w| w[0].delta_poc < w[1].delta_poc));
        }

        // Synthesized entries carry absolute POCs: every reference must
        // resolve inside the coded range.
        for entry in &compiled.entries[8..] {
            for &delta in &entry.reference_deltas {
                assert!(entry.poc_offset + delta >= 0);
            }
        }
    }

    #[test]
    fn incomplete_pattern_is_rejected() {
        let mut config = hierarchical_gop8();
        config.entries.truncate(5);

        assert_eq!(compile(&config), Err(CompileError::IncompleteGopPattern));
    }

    #[test]
    fn unresolvable_reference_is_rejected() {
        let config = GopConfig {
            gop_size: 2,
            intra_period: -1,
            decoding_refresh_type: DecodingRefreshType::None,
            max_temporal_layers: 1,
            max_extra_rps: 2,
            entries: vec![entry(2, 0, &[-2], 1), entry(1, 0, &[-1, 2], 2)],
        };

        // POC 3 is not yet decoded when POC 1 needs it.
        assert_eq!(
            compile(&config),
            Err(CompileError::DanglingReference { delta: 2, gop_index: 1 })
        );
    }

    #[test]
    fn synthesis_budget_is_bounded() {
        let _ = env_logger::try_init();
        let config = GopConfig {
            gop_size: 1,
            intra_period: -1,
            decoding_refresh_type: DecodingRefreshType::None,
            max_temporal_layers: 1,
            max_extra_rps: 1,
            entries: vec![entry(1, 0, &[-100], 1)],
        };

        // Every cycle keeps pointing before the sequence start, so the
        // synthesis budget runs out without verifying the pattern.
        assert_eq!(
            compile(&config),
            Err(CompileError::UnresolvableGopStructure { limit: 1 })
        );
    }
}
