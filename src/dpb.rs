// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-temporal-layer DPB sizing derived from the verified GOP pattern:
//! how many decoded pictures each layer must be able to hold, and how deep
//! the output reordering can get. These become `sps_max_dec_pic_buffering`
//! and `sps_num_reorder_pics`; see A.4.1.

use crate::gop::GopEntry;

/// Buffering bounds per temporal layer, indexed by temporal id. Both
/// arrays are non-decreasing in the temporal id, and
/// `num_reorder_pics[i] <= max_dec_pic_buffering[i] - 1` for every layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DpbRequirements {
    pub max_dec_pic_buffering: Vec<usize>,
    pub num_reorder_pics: Vec<usize>,
}

/// Computes the buffering bounds from the declared pattern (the first
/// `gop_size` entries; synthesized entries only patch up the sequence
/// start and never need more buffering than the steady-state pattern).
pub(crate) fn derive(
    entries: &[GopEntry],
    gop_size: usize,
    max_temporal_layers: usize,
) -> DpbRequirements {
    let pattern = &entries[..gop_size];
    let mut max_dec_pic_buffering = vec![1; max_temporal_layers];
    let mut num_reorder_pics = vec![0; max_temporal_layers];

    // A layer must hold each picture's references plus the picture itself.
    for entry in pattern {
        let tid = usize::from(entry.temporal_id);
        let needed = entry.reference_deltas.len() + 1;
        if needed > max_dec_pic_buffering[tid] {
            max_dec_pic_buffering[tid] = needed;
        }
    }

    // Reorder depth: pictures decoded before this one (bounded by the last
    // pattern position not after it in output order) that still come later
    // in output order and cannot be dropped at this layer.
    for entry in pattern {
        let mut bound = 0;
        for (j, other) in pattern.iter().enumerate() {
            if other.poc_offset <= entry.poc_offset {
                bound = j;
            }
        }

        let reorder = pattern[..bound]
            .iter()
            .filter(|other| {
                other.temporal_id <= entry.temporal_id && other.poc_offset > entry.poc_offset
            })
            .count();

        let tid = usize::from(entry.temporal_id);
        if reorder > num_reorder_pics[tid] {
            num_reorder_pics[tid] = reorder;
        }
    }

    // A lower layer must not require more buffering or reordering than a
    // higher one, and the reorder depth must fit in the buffer alongside
    // the current picture.
    for i in 0..max_temporal_layers - 1 {
        if num_reorder_pics[i + 1] < num_reorder_pics[i] {
            num_reorder_pics[i + 1] = num_reorder_pics[i];
        }
        if num_reorder_pics[i] > max_dec_pic_buffering[i] - 1 {
            max_dec_pic_buffering[i] = num_reorder_pics[i] + 1;
        }
        if max_dec_pic_buffering[i + 1] < max_dec_pic_buffering[i] {
            max_dec_pic_buffering[i + 1] = max_dec_pic_buffering[i];
        }
    }
    let last = max_temporal_layers - 1;
    if num_reorder_pics[last] > max_dec_pic_buffering[last] - 1 {
        max_dec_pic_buffering[last] = num_reorder_pics[last] + 1;
    }

    DpbRequirements { max_dec_pic_buffering, num_reorder_pics }
}
