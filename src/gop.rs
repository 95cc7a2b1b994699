// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Declarative GOP pattern model. A [`GopConfig`] describes one cycle of the
//! coding structure the encoder will repeat for the whole sequence; the
//! compiler turns it into the reference picture set list signaled in the SPS.

use thiserror::Error;

/// Slice type of one coding position.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SliceType {
    I,
    #[default]
    P,
    B,
}

/// How the sequence is periodically refreshed with intra pictures.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DecodingRefreshType {
    #[default]
    None,
    Cra,
    Idr,
}

/// Inter-RPS signaling requested for one entry.
///
/// `Explicit` carries the delta-RPS and per-candidate ref idc values
/// (0 = not in set, 1 = used by the current picture, 2 = kept but unused)
/// exactly as they would appear in `short_term_ref_pic_set()`. `Auto` asks
/// the compiler to derive them from the previous RPS in the list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InterRpsSignaling {
    #[default]
    None,
    Explicit { delta_rps: i32, ref_idc: Vec<u8> },
    Auto,
}

/// One coding position inside a GOP cycle.
///
/// `reference_deltas` are signed POC deltas from this picture to the
/// pictures it may reference. `used_by_curr` is parallel to it; it may be
/// left empty, the compiler recomputes the flags from temporal-id ordering
/// during verification anyway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GopEntry {
    /// Presentation position within one GOP cycle, -1 when unset. Entries
    /// synthesized by the compiler store an absolute POC here instead.
    pub poc_offset: i32,
    pub slice_type: SliceType,
    pub temporal_id: u8,
    /// Number of references the encoder actually wants active; synthesis
    /// stops collecting replacement candidates once this many are found.
    pub num_ref_pics_active: usize,
    pub reference_deltas: Vec<i32>,
    pub used_by_curr: Vec<bool>,
    pub inter_rps: InterRpsSignaling,

    /// Set by the compiler: some later picture in the pattern references
    /// this one.
    pub is_referenced: bool,
    /// Set by the compiler on synthesized entries that ended up with fewer
    /// references than `num_ref_pics_active` because no further candidates
    /// were available.
    pub partial_synthesis: bool,
}

impl Default for GopEntry {
    fn default() -> Self {
        Self {
            poc_offset: -1,
            slice_type: Default::default(),
            temporal_id: 0,
            num_ref_pics_active: 0,
            reference_deltas: vec![],
            used_by_curr: vec![],
            inter_rps: Default::default(),
            is_referenced: false,
            partial_synthesis: false,
        }
    }
}

impl GopEntry {
    /// The entry substituted for the whole pattern when the sequence is
    /// intra-only. No references, so the DPB never has to hold more than
    /// the picture being decoded.
    pub(crate) fn intra_only() -> Self {
        Self {
            poc_offset: 1,
            slice_type: SliceType::I,
            num_ref_pics_active: 4,
            ..Default::default()
        }
    }
}

/// Global parameters of the GOP pattern, handed in before compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GopConfig {
    pub gop_size: usize,
    /// Distance between intra pictures; -1 means a single leading intra
    /// picture, 1 means an intra-only sequence.
    pub intra_period: i32,
    pub decoding_refresh_type: DecodingRefreshType,
    /// Bound on temporal layers; every `temporal_id` must lie below it.
    pub max_temporal_layers: usize,
    /// Bound on synthesized RPS entries; must be at least `gop_size`.
    pub max_extra_rps: usize,
    pub entries: Vec<GopEntry>,
}

/// A single configuration problem. All violations are collected and
/// reported together so one run surfaces the full list.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error("GOP size must be greater than 0")]
    GopSizeNotPositive,
    #[error("GOP size greater than 1 must be a multiple of 2")]
    GopSizeNotMultipleOfTwo,
    #[error("intra period must be a multiple of the GOP size, or -1")]
    IntraPeriodNotMultiple,
    #[error("intra period must be larger than the GOP size for periodic IDR pictures")]
    IdrIntraPeriodTooShort,
    #[error("the last frame in each GOP must have temporal ID 0 (GOP frame {})", .index + 1)]
    GopAnchorTemporalId { index: usize },
    #[error(
        "GOP frame {} declares {deltas} reference deltas but {flags} usage flags",
        .index + 1
    )]
    UsageFlagsMismatch { index: usize, deltas: usize, flags: usize },
    #[error("{declared} GOP entries declared for a GOP size of {gop_size}")]
    TooManyEntries { declared: usize, gop_size: usize },
    #[error("synthesized RPS budget ({max_extra_rps}) must be at least the GOP size")]
    SynthesisBudgetTooSmall { max_extra_rps: usize },
    #[error("at least one temporal layer is required")]
    NoTemporalLayers,
    #[error(
        "GOP frame {} has temporal ID {temporal_id}, outside the configured {layers} layers",
        .index + 1
    )]
    TemporalIdOutOfRange { index: usize, temporal_id: u8, layers: usize },
}

impl GopConfig {
    /// Checks every range constraint at once, returning the full list of
    /// violations instead of stopping at the first one.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = vec![];

        if self.gop_size == 0 {
            violations.push(ConfigViolation::GopSizeNotPositive);
        } else if self.gop_size > 1 && self.gop_size % 2 != 0 {
            violations.push(ConfigViolation::GopSizeNotMultipleOfTwo);
        }

        if self.gop_size > 0 {
            if self.intra_period >= 0 && self.intra_period % self.gop_size as i32 != 0 {
                violations.push(ConfigViolation::IntraPeriodNotMultiple);
            }
            if self.decoding_refresh_type == DecodingRefreshType::Idr
                && self.intra_period > 0
                && self.intra_period <= self.gop_size as i32
            {
                violations.push(ConfigViolation::IdrIntraPeriodTooShort);
            }
        }

        if self.entries.len() > self.gop_size {
            violations.push(ConfigViolation::TooManyEntries {
                declared: self.entries.len(),
                gop_size: self.gop_size,
            });
        }

        if self.max_extra_rps < self.gop_size {
            violations.push(ConfigViolation::SynthesisBudgetTooSmall {
                max_extra_rps: self.max_extra_rps,
            });
        }

        if self.max_temporal_layers == 0 {
            violations.push(ConfigViolation::NoTemporalLayers);
        }

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.poc_offset == self.gop_size as i32 && entry.temporal_id != 0 {
                violations.push(ConfigViolation::GopAnchorTemporalId { index });
            }
            if !entry.used_by_curr.is_empty()
                && entry.used_by_curr.len() != entry.reference_deltas.len()
            {
                violations.push(ConfigViolation::UsageFlagsMismatch {
                    index,
                    deltas: entry.reference_deltas.len(),
                    flags: entry.used_by_curr.len(),
                });
            }
            if self.max_temporal_layers > 0
                && usize::from(entry.temporal_id) >= self.max_temporal_layers
            {
                violations.push(ConfigViolation::TemporalIdOutOfRange {
                    index,
                    temporal_id: entry.temporal_id,
                    layers: self.max_temporal_layers,
                });
            }
        }

        violations
    }
}
