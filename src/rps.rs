// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture sets as signaled in `short_term_ref_pic_set()`. See
//! 7.4.8 "Short-term reference picture set semantics".

use crate::gop::GopEntry;

/// One picture in an RPS: its POC delta from the current picture and
/// whether the current picture may actually reference it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RpsPicture {
    pub delta_poc: i32,
    pub used_by_curr: bool,
}

/// A reference picture set: a negative-delta prefix (pictures preceding the
/// current one in output order, closest first) followed by a positive-delta
/// suffix (pictures following it, closest first). That ordering is what the
/// decoder reconstructs from `delta_poc_s0_minus1` / `delta_poc_s1_minus1`,
/// so it must hold before the set is handed to the bitstream writer.
///
/// The set also carries its compact inter-RPS form: when
/// `inter_rps_predicted` is set, `delta_rps` and `ref_idc` alone let a
/// decoder rebuild the full set from the previous RPS in the list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferencePictureSet {
    pub(crate) pictures: Vec<RpsPicture>,
    pub(crate) num_negative: usize,
    pub(crate) num_positive: usize,

    pub inter_rps_predicted: bool,
    pub delta_rps: i32,
    pub ref_idc: Vec<u8>,
}

impl ReferencePictureSet {
    /// Builds the full (non-differential) set from a GOP entry, partitioning
    /// and sorting the deltas.
    pub fn from_entry(entry: &GopEntry) -> Self {
        let pictures = entry
            .reference_deltas
            .iter()
            .enumerate()
            .map(|(i, &delta_poc)| RpsPicture {
                delta_poc,
                used_by_curr: entry.used_by_curr.get(i).copied().unwrap_or(false),
            })
            .collect();

        Self::from_pictures(pictures)
    }

    /// Reconstructs a full set from a predecessor set plus its compact
    /// diff, the way a decoder would. Candidate `j` of the predecessor is
    /// its `j`-th picture, with the predecessor itself as the final
    /// candidate (delta 0).
    pub fn from_inter_prediction(reference: &Self, delta_rps: i32, ref_idc: &[u8]) -> Self {
        let mut pictures = vec![];
        for (j, &idc) in ref_idc.iter().enumerate() {
            if idc == 0 {
                continue;
            }
            let ref_delta = if j < reference.num_pictures() {
                reference.pictures[j].delta_poc
            } else {
                0
            };
            let delta_poc = delta_rps + ref_delta;
            // A candidate landing on the current picture itself is not part
            // of the derived set.
            if delta_poc == 0 {
                continue;
            }
            pictures.push(RpsPicture { delta_poc, used_by_curr: idc == 1 });
        }

        let mut rps = Self::from_pictures(pictures);
        rps.inter_rps_predicted = true;
        rps.delta_rps = delta_rps;
        rps.ref_idc = ref_idc.to_vec();
        rps
    }

    fn from_pictures(pictures: Vec<RpsPicture>) -> Self {
        let num_negative = pictures.iter().filter(|p| p.delta_poc <= 0).count();
        let num_positive = pictures.len() - num_negative;
        let mut rps = Self {
            pictures,
            num_negative,
            num_positive,
            ..Default::default()
        };
        rps.sort_delta_pocs();
        rps
    }

    /// Restores the partition ordering: negative deltas first, by ascending
    /// magnitude, then positive deltas ascending.
    fn sort_delta_pocs(&mut self) {
        self.pictures.sort_by_key(|p| p.delta_poc);
        self.pictures[..self.num_negative].reverse();
    }

    pub fn pictures(&self) -> &[RpsPicture] {
        &self.pictures
    }

    pub fn num_pictures(&self) -> usize {
        self.pictures.len()
    }

    pub fn num_negative_pics(&self) -> usize {
        self.num_negative
    }

    pub fn num_positive_pics(&self) -> usize {
        self.num_positive
    }

    pub fn delta_poc(&self, index: usize) -> Option<i32> {
        self.pictures.get(index).map(|p| p.delta_poc)
    }

    pub fn used_by_curr(&self, index: usize) -> Option<bool> {
        self.pictures.get(index).map(|p| p.used_by_curr)
    }

    /// Whether the two sets describe the same pictures, ignoring how they
    /// are signaled.
    pub fn same_pictures(&self, other: &Self) -> bool {
        self.pictures == other.pictures
            && self.num_negative == other.num_negative
            && self.num_positive == other.num_positive
    }
}
