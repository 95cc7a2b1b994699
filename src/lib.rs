// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture set compilation for HEVC-class encoders.
//!
//! An encoder declares its coding structure as one cycle of GOP entries:
//! which pictures exist, which temporal layer each belongs to and which
//! previously-decoded pictures each may reference. Before the first picture
//! is encoded, that declarative pattern has to be turned into the list of
//! reference picture sets signaled in the SPS, and the pattern proven
//! self-consistent: a decoder must be able to resolve every reference of
//! every picture the encoder will ever emit, including the first GOP cycle
//! where declared references can point before the sequence start.
//!
//! [`compile`] performs that one-time step: it validates the configuration,
//! simulates decoding order until every cycle position verifies,
//! synthesizes patch-up RPS entries where needed, derives the compact
//! inter-RPS signaling and computes per-temporal-layer DPB bounds. The
//! returned [`CompiledSequence`] is immutable and may be shared freely with
//! the bitstream writer and the picture scheduler for the lifetime of the
//! coded sequence.

pub mod compiler;
pub mod dpb;
pub mod gop;
pub mod inter_rps;
pub mod rps;

pub use compiler::CompileError;

use crate::gop::DecodingRefreshType;
use crate::gop::GopConfig;
use crate::gop::GopEntry;
use crate::rps::ReferencePictureSet;

/// The verified, read-only output of one GOP pattern compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledSequence {
    /// Declared entries (derived fields filled in) followed by the
    /// synthesized ones.
    pub entries: Vec<GopEntry>,
    pub gop_size: usize,
    pub extra_rps_count: usize,
    /// One RPS per entry, in table order.
    pub rps_list: Vec<ReferencePictureSet>,
    /// `sps_max_dec_pic_buffering`, indexed by temporal id.
    pub max_dec_pic_buffering: Vec<usize>,
    /// `sps_num_reorder_pics`, indexed by temporal id.
    pub num_reorder_pics: Vec<usize>,
    /// One more than the highest temporal id in the pattern.
    pub max_temporal_layer: u8,

    intra_period: i32,
    decoding_refresh_type: DecodingRefreshType,
}

impl CompiledSequence {
    /// Picks the RPS index a picture at `poc` should use. Pictures covered
    /// by a synthesized entry (the patched-up first cycle, repeated at
    /// every refresh point when periodic refresh is in use) get that
    /// entry's index; everything else keeps its cycle position `gop_index`.
    pub fn rps_index_for(&self, poc: i32, gop_index: usize) -> usize {
        let mut index = gop_index;
        for extra in self.gop_size..self.entries.len() {
            let synth_poc = self.entries[extra].poc_offset;
            if self.intra_period > 0 && self.decoding_refresh_type != DecodingRefreshType::None {
                let mut poc_index = poc % self.intra_period;
                if poc_index == 0 {
                    poc_index = self.intra_period;
                }
                if poc_index == synth_poc {
                    index = extra;
                }
            } else if poc == synth_poc {
                index = extra;
            }
        }
        index
    }
}

/// Compiles the declared GOP pattern into a verified [`CompiledSequence`].
///
/// All configuration range violations are collected and reported together;
/// structural failures (references that can never resolve, synthesis budget
/// exhaustion) abort compilation. There is no partial success: either the
/// whole table is valid or sequence setup must not proceed.
pub fn compile(config: &GopConfig) -> Result<CompiledSequence, CompileError> {
    let violations = config.validate();
    if !violations.is_empty() {
        return Err(CompileError::InvalidConfiguration(violations));
    }

    // Working copy of the pattern, padded to the declared GOP size with
    // unset entries so missing positions surface as IncompleteGopPattern.
    let mut entries = config.entries.clone();
    entries.resize_with(config.gop_size, GopEntry::default);

    // An intra-only sequence needs no GOP structure specification; every
    // picture stands alone.
    if config.intra_period == 1 {
        entries[0] = GopEntry::intra_only();
    }

    for entry in &mut entries {
        entry.used_by_curr.resize(entry.reference_deltas.len(), false);
        entry.is_referenced = false;
        entry.partial_synthesis = false;
    }

    let table = compiler::verify_and_synthesize(config, entries)?;
    let rps_list = inter_rps::build_rps_list(&table.entries);
    let requirements = dpb::derive(&table.entries, config.gop_size, config.max_temporal_layers);

    let mut max_temporal_layer = 1;
    for entry in &table.entries[..config.gop_size] {
        if entry.temporal_id >= max_temporal_layer {
            max_temporal_layer = entry.temporal_id + 1;
        }
    }

    Ok(CompiledSequence {
        entries: table.entries,
        gop_size: config.gop_size,
        extra_rps_count: table.extra_count,
        rps_list,
        max_dec_pic_buffering: requirements.max_dec_pic_buffering,
        num_reorder_pics: requirements.num_reorder_pics,
        max_temporal_layer,
        intra_period: config.intra_period,
        decoding_refresh_type: config.decoding_refresh_type,
    })
}
