// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Differential RPS signaling. Instead of transmitting the full delta list,
//! an RPS can be sent as a diff against the previous RPS in the list: a
//! single `delta_rps` plus one idc per candidate picture, where the
//! candidates are the predecessor's pictures and the predecessor itself.
//! See 7.4.8 `inter_ref_pic_set_prediction_flag`.

use log::warn;

use crate::gop::GopEntry;
use crate::gop::InterRpsSignaling;
use crate::rps::ReferencePictureSet;

/// Derives the compact diff of `cur` against `pred`, both synthesized
/// entries carrying absolute POCs. Returns the delta-RPS and one idc per
/// candidate: 1 if the candidate is in `cur`'s set and used, 2 if present
/// but unused, 0 if absent.
pub(crate) fn derive_ref_idc(pred: &GopEntry, cur: &GopEntry) -> (i32, Vec<u8>) {
    let delta_rps = pred.poc_offset - cur.poc_offset;
    let num_candidates = pred.reference_deltas.len() + 1;

    let mut ref_idc = Vec::with_capacity(num_candidates);
    for j in 0..num_candidates {
        // The final candidate is the predecessor picture itself (delta 0).
        let pred_delta = pred.reference_deltas.get(j).copied().unwrap_or(0);
        let abs_poc = pred.poc_offset + pred_delta;

        let mut idc = 0;
        for (k, &delta) in cur.reference_deltas.iter().enumerate() {
            if abs_poc - cur.poc_offset == delta {
                idc = if cur.used_by_curr[k] { 1 } else { 2 };
            }
        }
        ref_idc.push(idc);
    }

    (delta_rps, ref_idc)
}

/// Builds the RPS list for the whole compiled table and resolves each
/// entry's inter-RPS signaling against its predecessor in the list.
///
/// Declared signaling is advisory: whenever the idc values disagree with
/// the entry's own delta list, the values recomputed from the idcs win,
/// since they are what a decoder will reconstruct.
pub fn build_rps_list(entries: &[GopEntry]) -> Vec<ReferencePictureSet> {
    let mut list: Vec<ReferencePictureSet> = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let mut rps = ReferencePictureSet::from_entry(entry);

        match &entry.inter_rps {
            InterRpsSignaling::None => {}
            _ if i == 0 => {
                // No predecessor to predict from; send the full set.
                warn!("RPS 0 requests inter-RPS prediction, sending it in full");
            }
            InterRpsSignaling::Auto => {
                derive_auto(&mut rps, i, entries, &list);
            }
            InterRpsSignaling::Explicit { delta_rps, ref_idc } => {
                cross_check_explicit(&mut rps, i, *delta_rps, ref_idc, &list[i - 1]);
            }
        }

        list.push(rps);
    }

    list
}

/// Automatic derivation of the idc list from the predecessor RPS. If some
/// picture of the current set cannot be expressed as predecessor picture +
/// delta-RPS, prediction is abandoned for this entry.
fn derive_auto(
    rps: &mut ReferencePictureSet,
    index: usize,
    entries: &[GopEntry],
    list: &[ReferencePictureSet],
) {
    let delta_rps = entries[index - 1].poc_offset - entries[index].poc_offset;
    let reference = &list[index - 1];
    let num_candidates = reference.num_pictures() + 1;

    let mut ref_idc = vec![0u8; num_candidates];
    let mut matched = 0;
    for (j, idc) in ref_idc.iter_mut().enumerate() {
        let ref_delta = reference.delta_poc(j).unwrap_or(0);
        for picture in rps.pictures() {
            if picture.delta_poc == ref_delta + delta_rps {
                *idc = if picture.used_by_curr { 1 } else { 2 };
                matched += 1;
                break;
            }
        }
    }

    if matched != rps.num_pictures() {
        warn!(
            "unable to predict all delta POCs of RPS {} from the previous RPS, \
             sending it in full",
            index
        );
        return;
    }

    rps.inter_rps_predicted = true;
    rps.delta_rps = delta_rps;
    rps.ref_idc = ref_idc;
}

/// Checks declared (or compiler-derived) idc values against the set they
/// are supposed to describe, and overrides the set with the reconstruction
/// when they disagree. Synthesized entries always pass this check; it only
/// fires for inconsistent user configuration.
fn cross_check_explicit(
    rps: &mut ReferencePictureSet,
    index: usize,
    delta_rps: i32,
    ref_idc: &[u8],
    reference: &ReferencePictureSet,
) {
    let recomputed = ReferencePictureSet::from_inter_prediction(reference, delta_rps, ref_idc);

    if recomputed.num_negative_pics() != rps.num_negative_pics() {
        warn!(
            "RPS {}: negative picture count differs between the full and inter-RPS \
             forms ({} vs {}), using the inter-RPS form",
            index,
            rps.num_negative_pics(),
            recomputed.num_negative_pics()
        );
    }
    if recomputed.num_positive_pics() != rps.num_positive_pics() {
        warn!(
            "RPS {}: positive picture count differs between the full and inter-RPS \
             forms ({} vs {}), using the inter-RPS form",
            index,
            rps.num_positive_pics(),
            recomputed.num_positive_pics()
        );
    }
    for (j, picture) in recomputed.pictures().iter().enumerate() {
        if rps.delta_poc(j) != Some(picture.delta_poc) {
            warn!(
                "RPS {}: delta POC {} differs between the full and inter-RPS forms",
                index, j
            );
        }
        if rps.used_by_curr(j) != Some(picture.used_by_curr) {
            warn!(
                "RPS {}: used-by-current flag {} differs between the full and \
                 inter-RPS forms",
                index, j
            );
        }
    }

    // The reconstruction is what decoders see, so it is authoritative.
    rps.pictures = recomputed.pictures;
    rps.num_negative = recomputed.num_negative;
    rps.num_positive = recomputed.num_positive;
    rps.inter_rps_predicted = true;
    rps.delta_rps = delta_rps;
    rps.ref_idc = ref_idc.to_vec();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::gop::DecodingRefreshType;
    use crate::gop::GopConfig;
    use crate::gop::SliceType;
    use crate::rps::ReferencePictureSet;

    fn entry(
        poc_offset: i32,
        temporal_id: u8,
        deltas: &[i32],
        inter_rps: InterRpsSignaling,
    ) -> GopEntry {
        GopEntry {
            poc_offset,
            slice_type: SliceType::B,
            temporal_id,
            num_ref_pics_active: deltas.len(),
            reference_deltas: deltas.to_vec(),
            inter_rps,
            ..Default::default()
        }
    }

    fn two_picture_gop(inter_rps: InterRpsSignaling) -> GopConfig {
        GopConfig {
            gop_size: 2,
            intra_period: -1,
            decoding_refresh_type: DecodingRefreshType::None,
            max_temporal_layers: 2,
            max_extra_rps: 2,
            entries: vec![
                entry(2, 0, &[-2], InterRpsSignaling::None),
                entry(1, 1, &[-1, 1], inter_rps),
            ],
        }
    }

    #[test]
    fn auto_mode_derives_idc_from_predecessor() {
        let compiled = compile(&two_picture_gop(InterRpsSignaling::Auto)).unwrap();

        let rps = &compiled.rps_list[1];
        assert!(rps.inter_rps_predicted);
        assert_eq!(rps.delta_rps, 1);
        assert_eq!(rps.ref_idc, vec![1, 1]);
    }

    #[test]
    fn auto_mode_falls_back_to_full_rps() {
        // The predecessor set {-4} shifted by delta-RPS 2 can express -2
        // and 2, but not 1.
        let entries = vec![
            entry(4, 0, &[-4], InterRpsSignaling::None),
            entry(2, 0, &[-2, 1], InterRpsSignaling::Auto),
        ];
        let list = build_rps_list(&entries);

        assert!(!list[1].inter_rps_predicted);
        assert_eq!(list[1].num_pictures(), 2);
    }

    #[test]
    fn explicit_mode_matching_signaling_is_kept() {
        let signaling = InterRpsSignaling::Explicit { delta_rps: 1, ref_idc: vec![1, 1] };
        let compiled = compile(&two_picture_gop(signaling)).unwrap();

        let rps = &compiled.rps_list[1];
        assert!(rps.inter_rps_predicted);
        assert_eq!(rps.delta_rps, 1);
        assert_eq!(rps.ref_idc, vec![1, 1]);
        let deltas: Vec<i32> = rps.pictures().iter().map(|p| p.delta_poc).collect();
        assert_eq!(deltas, vec![-1, 1]);
    }

    #[test]
    fn explicit_mismatch_is_overridden_by_reconstruction() {
        // The declared idcs only keep the backward reference, while the
        // entry itself declares a forward one too; the reconstruction wins.
        let signaling = InterRpsSignaling::Explicit { delta_rps: 1, ref_idc: vec![1, 0] };
        let compiled = compile(&two_picture_gop(signaling)).unwrap();

        let rps = &compiled.rps_list[1];
        assert!(rps.inter_rps_predicted);
        assert_eq!(rps.num_pictures(), 1);
        assert_eq!(rps.num_negative_pics(), 1);
        assert_eq!(rps.num_positive_pics(), 0);
        assert_eq!(rps.delta_poc(0), Some(-1));
        assert_eq!(rps.ref_idc, vec![1, 0]);
    }

    #[test]
    fn first_rps_cannot_be_predicted() {
        let entries = vec![entry(2, 0, &[-2], InterRpsSignaling::Auto)];
        let list = build_rps_list(&entries);

        assert!(!list[0].inter_rps_predicted);
        assert_eq!(list[0].num_pictures(), 1);
    }

    #[test]
    fn synthesized_diffs_round_trip() {
        let compiled = compile(&crate::compiler::tests::hierarchical_gop8()).unwrap();

        // Three synthesized entries; the second and third are predicted
        // from their immediate predecessor.
        assert!(!compiled.rps_list[8].inter_rps_predicted);
        assert_eq!(compiled.rps_list[9].delta_rps, 4);
        assert_eq!(compiled.rps_list[9].ref_idc, vec![1, 1]);
        assert_eq!(compiled.rps_list[10].delta_rps, 2);
        assert_eq!(compiled.rps_list[10].ref_idc, vec![1, 1, 1]);

        for i in [9, 10] {
            let rps = &compiled.rps_list[i];
            assert!(rps.inter_rps_predicted);
            let rebuilt = ReferencePictureSet::from_inter_prediction(
                &compiled.rps_list[i - 1],
                rps.delta_rps,
                &rps.ref_idc,
            );
            assert!(rebuilt.same_pictures(rps));
        }
    }
}
