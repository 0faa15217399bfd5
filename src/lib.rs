// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Compression core of a Compressed Probabilistic Counting (CPC) sketch.
//!
//! CPC, a.k.a. FM85, is the unique-counting sketch developed by Kevin Lang
//! in his paper [Back to the Future: an Even More Nearly Optimal Cardinality
//! Estimation Algorithm](https://arxiv.org/abs/1708.06839). Much of its
//! space advantage over compressed HyperLogLog comes from the entropy coder
//! implemented here: the sketch's sliding window compresses under a
//! table-driven Huffman byte code, and its surprising-value pairs compress
//! under delta coding with a length-limited unary code for column deltas and
//! a Golomb-Rice code for row deltas.
//!
//! This crate is only the codec. It converts an [`UncompressedState`] into
//! a [`CompressedState`] and back, losslessly, dispatching on the sketch's
//! [`Flavor`]. Coupon collection, cardinality estimation, merging, and
//! serialization framing belong to the surrounding system; in particular
//! the caller stores the scalars and the flavor discriminator out-of-band,
//! since the emitted word streams are not self-describing.

#![deny(missing_docs)]

pub mod error;

mod bit_stream;
mod compression;
mod compression_data;
mod pair_table;

pub use self::compression::CompressedState;
pub use self::compression::UncompressedState;
pub use self::pair_table::PairTable;
pub use self::pair_table::introspective_insertion_sort;

use crate::error::Error;

/// Min log2 of K.
pub const MIN_LG_K: u8 = 4;
/// Max log2 of K.
pub const MAX_LG_K: u8 = 26;

/// The coding regime of a sketch, a function of its coupon count.
///
/// Each flavor canonicalizes the sketch state differently before coding,
/// so the same discriminator must be supplied to both directions.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Flavor {
    /// No coupons collected.
    Empty = 0, //     0  == C <    1
    /// Pair table only, no window.
    Sparse = 1, //    1  <= C <   3K/32
    /// Window at offset zero; window bits and table pairs are coded as a
    /// single pair stream.
    Hybrid = 2, // 3K/32 <= C <   K/2
    /// Window at offset zero or above; window bytes and table pairs are
    /// coded as separate streams.
    Pinned = 3, //   K/2 <= C < 27K/8  [NB: 27/8 = 3 + 3/8]
    /// Window at a positive offset; table columns are rotated and permuted
    /// before coding.
    Sliding = 4, // 27K/8 <= C
}

impl Flavor {
    /// The value a caller stores out-of-band and feeds back through
    /// [`TryFrom<u8>`].
    pub const fn discriminant(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Flavor {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Flavor::Empty),
            1 => Ok(Flavor::Sparse),
            2 => Ok(Flavor::Hybrid),
            3 => Ok(Flavor::Pinned),
            4 => Ok(Flavor::Sliding),
            _ => Err(Error::invalid_state("unknown sketch flavor").with_context("flavor", value)),
        }
    }
}

/// Derives the flavor from the sketch's size and coupon count.
pub fn determine_flavor(lg_k: u8, num_coupons: u32) -> Flavor {
    let k = 1u64 << lg_k;
    let c = u64::from(num_coupons);
    if c == 0 {
        Flavor::Empty
    } else if c << 5 < 3 * k {
        Flavor::Sparse
    } else if c << 1 < k {
        Flavor::Hybrid
    } else if c << 3 < 27 * k {
        Flavor::Pinned
    } else {
        Flavor::Sliding
    }
}

/// The window offset that goes with a coupon count: `(8C - 19K) / 8K`,
/// clamped at zero.
pub fn determine_window_offset(lg_k: u8, num_coupons: u32) -> u8 {
    let k = 1i64 << lg_k;
    let tmp = (i64::from(num_coupons) << 3) - (19 * k); // 8C - 19K
    if tmp < 0 {
        0
    } else {
        (tmp >> (lg_k + 3)) as u8 // tmp / 8K
    }
}
