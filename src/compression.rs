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

use crate::Flavor;
use crate::MAX_LG_K;
use crate::MIN_LG_K;
use crate::bit_stream::BitReader;
use crate::bit_stream::BitWriter;
use crate::compression_data::COLUMN_PERMUTATIONS_FOR_DECODING;
use crate::compression_data::COLUMN_PERMUTATIONS_FOR_ENCODING;
use crate::compression_data::DECODING_TABLES_FOR_HIGH_ENTROPY_BYTE;
use crate::compression_data::ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE;
use crate::compression_data::LENGTH_LIMITED_UNARY_DECODING_TABLE65;
use crate::compression_data::LENGTH_LIMITED_UNARY_ENCODING_TABLE65;
use crate::error::Error;
use crate::pair_table::PairTable;
use crate::pair_table::introspective_insertion_sort;

/// The in-memory form of a sketch, as the update path leaves it.
///
/// `sliding_window` is empty for flavors that carry no window and exactly
/// `2^lg_k` bytes otherwise. The surprising-value table holds pair codes
/// `(row << 6) | col` with no duplicates.
#[derive(Debug, Clone)]
pub struct UncompressedState {
    /// log2 of the number of rows.
    pub lg_k: u8,
    /// The number of coupons collected so far.
    pub num_coupons: u32,
    /// The low column covered by the window's byte representation.
    pub window_offset: u8,
    /// One byte per row in dense mode, empty otherwise.
    pub sliding_window: Vec<u8>,
    /// Set bits outside the window.
    pub surprising_value_table: PairTable,
}

impl UncompressedState {
    /// Creates the state of an empty sketch.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in the range `[4, 26]`.
    pub fn new(lg_k: u8) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k out of range; got {lg_k}",
        );
        Self {
            lg_k,
            num_coupons: 0,
            window_offset: 0,
            sliding_window: vec![],
            surprising_value_table: PairTable::new(2, lg_k + 6),
        }
    }
}

/// The entropy-coded form of a sketch.
///
/// The two streams are 32-bit word arrays whose buffers may be longer than
/// the used lengths recorded beside them. An empty vector means the stream
/// is absent for the sketch's flavor. The scalars travel with the streams
/// because decoding is parameterized on them; the flavor discriminator
/// itself is the caller's to store.
#[derive(Debug, Clone, Default)]
pub struct CompressedState {
    /// log2 of the number of rows.
    pub lg_k: u8,
    /// The number of coupons collected so far.
    pub num_coupons: u32,
    /// The low column covered by the window's byte representation.
    pub window_offset: u8,
    /// Huffman-coded window bytes.
    pub compressed_window: Vec<u32>,
    /// Words of `compressed_window` actually used.
    pub cw_length: usize,
    /// Delta-coded surprising-value pairs.
    pub compressed_surprising_values: Vec<u32>,
    /// Words of `compressed_surprising_values` actually used.
    pub csv_length: usize,
    /// Pairs in the coded stream. In the Hybrid flavor this exceeds the
    /// table's entry count because window bits are coded as pairs too.
    pub num_compressed_surprising_values: u32,
}

impl CompressedState {
    /// Entropy-codes `source` under the given flavor.
    ///
    /// The flavor must be the one the caller derived for `source`; handing
    /// a state to the wrong driver is a programming error.
    pub fn compress(source: &UncompressedState, flavor: Flavor) -> Self {
        let mut target = Self {
            lg_k: source.lg_k,
            num_coupons: source.num_coupons,
            window_offset: source.window_offset,
            ..Self::default()
        };
        match flavor {
            Flavor::Empty => {
                debug_assert_eq!(source.num_coupons, 0);
            }
            Flavor::Sparse => {
                target.compress_sparse_flavor(source);
                debug_assert!(target.compressed_window.is_empty(), "window is not expected");
                debug_assert!(!target.compressed_surprising_values.is_empty(), "table is expected");
            }
            Flavor::Hybrid => {
                target.compress_hybrid_flavor(source);
                debug_assert!(target.compressed_window.is_empty(), "window is not expected");
                debug_assert!(!target.compressed_surprising_values.is_empty(), "table is expected");
            }
            Flavor::Pinned => {
                target.compress_pinned_flavor(source);
                debug_assert!(!target.compressed_window.is_empty(), "window is expected");
            }
            Flavor::Sliding => {
                target.compress_sliding_flavor(source);
                debug_assert!(!target.compressed_window.is_empty(), "window is expected");
            }
        }
        target
    }

    /// Decodes back into the in-memory form.
    ///
    /// This is the untrusted-input boundary: malformed streams, stream
    /// lengths that disagree with their buffers, and decoded positions
    /// outside the sketch surface as [`crate::error::ErrorKind::InvalidData`].
    /// On error no partial state escapes.
    pub fn uncompress(&self, flavor: Flavor) -> Result<UncompressedState, Error> {
        if self.window_offset > 56 {
            return Err(Error::invalid_data("window offset out of range")
                .with_context("window_offset", self.window_offset));
        }
        let mut target = UncompressedState::new(self.lg_k);
        target.num_coupons = self.num_coupons;
        target.window_offset = self.window_offset;
        match flavor {
            Flavor::Empty => {}
            Flavor::Sparse => self.uncompress_sparse_flavor(&mut target)?,
            Flavor::Hybrid => self.uncompress_hybrid_flavor(&mut target)?,
            Flavor::Pinned => self.uncompress_pinned_flavor(&mut target)?,
            Flavor::Sliding => self.uncompress_sliding_flavor(&mut target)?,
        }
        Ok(target)
    }

    fn compress_sparse_flavor(&mut self, source: &UncompressedState) {
        debug_assert!(source.sliding_window.is_empty());
        let mut pairs = source.surprising_value_table.unwrapping_get_items();
        introspective_insertion_sort(&mut pairs);
        self.compress_surprising_values(&pairs, source.lg_k);
    }

    fn compress_hybrid_flavor(&mut self, source: &UncompressedState) {
        debug_assert!(!source.sliding_window.is_empty());
        debug_assert_eq!(source.window_offset, 0);

        let mut pairs = source.surprising_value_table.unwrapping_get_items();
        introspective_insertion_sort(&mut pairs);
        let num_pairs_from_table = pairs.len();
        let all_pairs_len = source.num_coupons as usize;
        debug_assert!(num_pairs_from_table <= all_pairs_len);

        // Window bits become implicit pairs, read into the space behind
        // where the table pairs will land after the merge.
        let mut all_pairs = vec![0u32; all_pairs_len];
        let mut idx = num_pairs_from_table;
        for (row_index, &window_byte) in source.sliding_window.iter().enumerate() {
            let mut window_byte = window_byte;
            while window_byte != 0 {
                let col_index = window_byte.trailing_zeros();
                window_byte ^= 1 << col_index; // erase the 1
                all_pairs[idx] = ((row_index as u32) << 6) | col_index;
                idx += 1;
            }
        }
        assert_eq!(idx, all_pairs_len, "window bit count disagrees with num_coupons");

        // Two-way merge of the table pairs into the front of all_pairs.
        // The write cursor never catches up with the window read cursor.
        let mut final_idx = 0;
        let mut table_idx = 0;
        let mut window_idx = num_pairs_from_table;
        while final_idx < all_pairs_len {
            if table_idx < num_pairs_from_table
                && (window_idx >= all_pairs_len || pairs[table_idx] <= all_pairs[window_idx])
            {
                all_pairs[final_idx] = pairs[table_idx];
                table_idx += 1;
            } else {
                all_pairs[final_idx] = all_pairs[window_idx];
                window_idx += 1;
            }
            final_idx += 1;
        }

        self.compress_surprising_values(&all_pairs, source.lg_k);
    }

    fn compress_pinned_flavor(&mut self, source: &UncompressedState) {
        self.compress_sliding_window(&source.sliding_window, source.lg_k, source.num_coupons);
        let mut pairs = source.surprising_value_table.unwrapping_get_items();
        if !pairs.is_empty() {
            // Every column index is at least 8 in a Pinned sketch and the
            // columns sit in the low 6 bits, so the 8-column shift can be
            // applied to the packed pair codes directly.
            for pair in &mut pairs {
                assert!(*pair & 63 >= 8, "pair column index is less than 8: {pair}");
                *pair -= 8;
            }

            introspective_insertion_sort(&mut pairs);
            self.compress_surprising_values(&pairs, source.lg_k);
        }
    }

    // Complicated by the existence of both a left fringe and a right fringe.
    fn compress_sliding_flavor(&mut self, source: &UncompressedState) {
        self.compress_sliding_window(&source.sliding_window, source.lg_k, source.num_coupons);
        let mut pairs = source.surprising_value_table.unwrapping_get_items();
        if !pairs.is_empty() {
            // The column transform changes the implied ordering of the
            // pairs, so it must happen before the sort.
            let pseudo_phase = determine_pseudo_phase(source.lg_k, source.num_coupons);
            let permutation = &COLUMN_PERMUTATIONS_FOR_ENCODING[pseudo_phase];
            let offset = source.window_offset;
            debug_assert!((1..=56).contains(&offset), "offset is invalid: {offset}");
            for pair in &mut pairs {
                let row = *pair >> 6;
                let mut col = (*pair & 63) as u8;
                // first rotate the columns into a canonical configuration:
                //  new = ((old - (offset+8)) + 64) mod 64
                col = (col + 56 - offset) & 63;
                debug_assert!(col < 56);
                // then apply the permutation
                col = permutation[col as usize];
                *pair = (row << 6) | u32::from(col);
            }

            introspective_insertion_sort(&mut pairs);
            self.compress_surprising_values(&pairs, source.lg_k);
        }
    }

    fn uncompress_sparse_flavor(&self, target: &mut UncompressedState) -> Result<(), Error> {
        debug_assert!(self.compressed_window.is_empty(), "window is not expected");
        let pairs = self.uncompress_surprising_values()?;
        target.surprising_value_table = PairTable::from_pairs(self.lg_k, &pairs);
        Ok(())
    }

    fn uncompress_hybrid_flavor(&self, target: &mut UncompressedState) -> Result<(), Error> {
        debug_assert!(self.compressed_window.is_empty(), "window is not expected");
        let mut pairs = self.uncompress_surprising_values()?;

        // Some of these pairs actually belong in the window, so we separate
        // them out, moving the true pairs to the bottom of the array.
        let k = 1usize << self.lg_k;
        let mut window = vec![0u8; k]; // important: zero the memory
        let mut next_true_pair = 0;
        for i in 0..pairs.len() {
            let row_col = pairs[i];
            let col = row_col & 63;
            if col < 8 {
                let row = (row_col >> 6) as usize;
                window[row] |= 1 << col; // set the window bit
            } else {
                pairs[next_true_pair] = row_col;
                next_true_pair += 1;
            }
        }

        target.surprising_value_table = PairTable::from_pairs(self.lg_k, &pairs[..next_true_pair]);
        target.sliding_window = window;
        Ok(())
    }

    fn uncompress_pinned_flavor(&self, target: &mut UncompressedState) -> Result<(), Error> {
        target.sliding_window = self.uncompress_sliding_window()?;
        let num_pairs = self.num_compressed_surprising_values;
        if num_pairs > 0 {
            let mut pairs = self.uncompress_surprising_values()?;
            // undo the compressor's 8-column shift
            for pair in &mut pairs {
                if *pair & 63 >= 56 {
                    return Err(Error::invalid_data("pair column index out of range")
                        .with_context("pair", *pair));
                }
                *pair += 8;
            }
            target.surprising_value_table = PairTable::from_pairs(self.lg_k, &pairs);
        }
        Ok(())
    }

    fn uncompress_sliding_flavor(&self, target: &mut UncompressedState) -> Result<(), Error> {
        target.sliding_window = self.uncompress_sliding_window()?;
        let num_pairs = self.num_compressed_surprising_values;
        if num_pairs > 0 {
            let mut pairs = self.uncompress_surprising_values()?;
            let pseudo_phase = determine_pseudo_phase(self.lg_k, self.num_coupons);
            let permutation = &COLUMN_PERMUTATIONS_FOR_DECODING[pseudo_phase];
            let offset = self.window_offset;

            for pair in &mut pairs {
                let row = *pair >> 6;
                let mut col = (*pair & 63) as u8;
                if col >= 56 {
                    return Err(Error::invalid_data("pair column index out of range")
                        .with_context("pair", *pair));
                }
                // first undo the permutation
                col = permutation[col as usize];
                // then undo the rotation: old = (new + (offset+8)) mod 64
                col = (col + offset + 8) & 63;
                *pair = (row << 6) | u32::from(col);
            }

            target.surprising_value_table = PairTable::from_pairs(self.lg_k, &pairs);
        }
        Ok(())
    }

    fn compress_surprising_values(&mut self, pairs: &[u32], lg_k: u8) {
        debug_assert!(!pairs.is_empty());
        let k = 1u64 << lg_k;
        let num_pairs = pairs.len();
        let num_base_bits =
            golomb_choose_number_of_base_bits(k + num_pairs as u64, num_pairs as u64);
        let buf_len = safe_length_for_compressed_pair_buf(1 << lg_k, num_pairs, num_base_bits);
        let mut buf = vec![0u32; buf_len];

        self.csv_length = low_level_compress_pairs(pairs, num_base_bits, &mut buf);

        // The unused tail of the buffer stays allocated; the used length is
        // tracked separately.
        // Note: realloc caused strange timing spikes for lgK = 11 and 12.
        self.compressed_surprising_values = buf;
        self.num_compressed_surprising_values = num_pairs as u32;
    }

    fn compress_sliding_window(&mut self, window: &[u8], lg_k: u8, num_coupons: u32) {
        let k = 1usize << lg_k;
        debug_assert_eq!(window.len(), k);
        let mut buf = vec![0u32; safe_length_for_compressed_window_buf(k)];
        let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
        self.cw_length = low_level_compress_bytes(
            window,
            &ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE[pseudo_phase],
            &mut buf,
        );
        self.compressed_window = buf;
    }

    fn uncompress_surprising_values(&self) -> Result<Vec<u32>, Error> {
        let k = 1u64 << self.lg_k;
        let num_pairs = self.num_compressed_surprising_values as usize;
        if num_pairs == 0 {
            return Err(Error::invalid_data("pair stream recorded with zero entries"));
        }
        let words = self
            .compressed_surprising_values
            .get(..self.csv_length)
            .ok_or_else(|| {
                Error::invalid_data("pair stream shorter than its recorded length")
                    .with_context("csv_length", self.csv_length)
            })?;
        let num_base_bits =
            golomb_choose_number_of_base_bits(k + num_pairs as u64, num_pairs as u64);
        let pairs = low_level_uncompress_pairs(num_pairs, num_base_bits, words)?;
        if let Some(&bad) = pairs.iter().find(|&&pair| u64::from(pair >> 6) >= k) {
            return Err(Error::invalid_data("decoded row exceeds the sketch size")
                .with_context("pair", bad));
        }
        Ok(pairs)
    }

    fn uncompress_sliding_window(&self) -> Result<Vec<u8>, Error> {
        let k = 1usize << self.lg_k;
        let words = self.compressed_window.get(..self.cw_length).ok_or_else(|| {
            Error::invalid_data("window stream shorter than its recorded length")
                .with_context("cw_length", self.cw_length)
        })?;
        let pseudo_phase = determine_pseudo_phase(self.lg_k, self.num_coupons);
        low_level_uncompress_bytes(k, &DECODING_TABLES_FOR_HIGH_ENTROPY_BYTE[pseudo_phase], words)
    }
}

/// Returns the number of words actually used.
///
/// It is the caller's responsibility to make `words` at least
/// [`safe_length_for_compressed_window_buf`] long.
fn low_level_compress_bytes(
    byte_array: &[u8],
    encoding_table: &[u16; 256],
    words: &mut [u32],
) -> usize {
    let mut writer = BitWriter::new(words);
    for &byte in byte_array {
        let code_info = encoding_table[usize::from(byte)];
        writer.write(u64::from(code_info & 0xfff), (code_info >> 12) as u8);
    }

    // Pad the bitstream with 11 zero-bits so that the decompressor's 12-bit
    // peek can't overrun its input.
    writer.pad(11);
    writer.finish()
}

fn low_level_uncompress_bytes(
    num_bytes_to_decode: usize,
    decoding_table: &[u16; 4096],
    words: &[u32],
) -> Result<Vec<u8>, Error> {
    let mut reader = BitReader::new(words);
    let mut byte_array = Vec::with_capacity(num_bytes_to_decode);
    for _ in 0..num_bytes_to_decode {
        reader.ensure(12)?;
        // These 12 bits will include an entire Huffman codeword.
        let lookup = decoding_table[reader.peek(12) as usize];
        byte_array.push((lookup & 0xff) as u8);
        reader.consume((lookup >> 8) as u8);
    }
    Ok(byte_array)
}

/// Returns the number of words actually used.
///
/// Here "pairs" refers to row/column pairs that specify the positions of
/// surprising values in the bit matrix.
fn low_level_compress_pairs(pairs: &[u32], num_base_bits: u8, words: &mut [u32]) -> usize {
    let mut writer = BitWriter::new(words);
    let golomb_lo_mask = (1u64 << num_base_bits) - 1;
    let mut predicted_row_index = 0u32;
    let mut predicted_col_index = 0u32;

    for &row_col in pairs {
        let row_index = row_col >> 6;
        let col_index = row_col & 63;

        if row_index != predicted_row_index {
            predicted_col_index = 0;
        }

        assert!(row_index >= predicted_row_index);
        assert!(col_index >= predicted_col_index);

        let y_delta = u64::from(row_index - predicted_row_index);
        let x_delta = col_index - predicted_col_index;

        predicted_row_index = row_index;
        predicted_col_index = col_index + 1;

        let code_info = LENGTH_LIMITED_UNARY_ENCODING_TABLE65[x_delta as usize];
        writer.write(u64::from(code_info & 0xfff), (code_info >> 12) as u8);

        writer.write_unary(y_delta >> num_base_bits);
        writer.write(y_delta & golomb_lo_mask, num_base_bits);
    }

    // Pad the bitstream so that the decompressor's 12-bit peek can't overrun
    // its input.
    writer.pad(10u8.saturating_sub(num_base_bits));
    writer.finish()
}

fn low_level_uncompress_pairs(
    num_pairs_to_decode: usize,
    num_base_bits: u8,
    words: &[u32],
) -> Result<Vec<u32>, Error> {
    let mut reader = BitReader::new(words);
    let mut pairs = Vec::with_capacity(num_pairs_to_decode);
    let mut predicted_row_index = 0u64;
    let mut predicted_col_index = 0u32;

    // for each pair we need to read:
    // x_delta (12-bit length-limited unary)
    // y_delta_hi (unary)
    // y_delta_lo (base bits)

    for _ in 0..num_pairs_to_decode {
        reader.ensure(12)?;
        let lookup = LENGTH_LIMITED_UNARY_DECODING_TABLE65[reader.peek(12) as usize];
        let x_delta = u32::from(lookup & 0xff);
        reader.consume((lookup >> 8) as u8);

        let golomb_hi = reader.read_unary()?;
        reader.ensure(num_base_bits)?;
        let golomb_lo = reader.peek(num_base_bits);
        reader.consume(num_base_bits);
        let y_delta = (golomb_hi << num_base_bits) | golomb_lo;

        // Now that we have x_delta and y_delta, we can compute the pair's
        // row and column.
        if y_delta > 0 {
            predicted_col_index = 0;
        }
        let row_index = predicted_row_index + y_delta;
        let col_index = predicted_col_index + x_delta;
        if row_index > u64::from(u32::MAX >> 6) || col_index > 63 {
            return Err(Error::invalid_data("decoded pair out of range")
                .with_context("row", row_index)
                .with_context("col", col_index));
        }
        pairs.push(((row_index as u32) << 6) | col_index);
        predicted_row_index = row_index;
        predicted_col_index = col_index + 1;
    }
    Ok(pairs)
}

/// Selects the coding tables for a sketch's byte distribution.
fn determine_pseudo_phase(lg_k: u8, num_coupons: u32) -> usize {
    let k = 1u64 << lg_k;
    let c = u64::from(num_coupons);
    // This mid-range logic produces pseudo-phases. They are used to select
    // encoding tables. The thresholds were chosen by hand after looking at
    // plots of measured compression.
    if 1000 * c < 2375 * k {
        if 4 * c < 3 * k {
            // mid-range table
            16
        } else if 10 * c < 11 * k {
            // mid-range table
            16 + 1
        } else if 100 * c < 132 * k {
            // mid-range table
            16 + 2
        } else if 3 * c < 5 * k {
            // mid-range table
            16 + 3
        } else if 1000 * c < 1965 * k {
            // mid-range table
            16 + 4
        } else if 1000 * c < 2275 * k {
            // mid-range table
            16 + 5
        } else {
            // steady-state table employed before its actual phase
            6
        }
    } else {
        // This steady-state logic produces true phases. They are used to
        // select encoding tables, and also column permutations for the
        // "Sliding" flavor.
        debug_assert!(lg_k >= 4);
        ((c >> (lg_k - 4)) & 15) as usize
    }
}

// Explanation of padding: we write
// 1) xdelta (huffman, provides at least 1 bit, requires 12-bit lookahead)
// 2) ydeltaGolombHi (unary, provides at least 1 bit, requires 8-bit lookahead)
// 3) ydeltaGolombLo (straight B bits).
// So the 12-bit lookahead is the tight constraint, but there are at least
// (2 + B) bits emitted, so we would be safe with max(0, 10 - B) bits of
// padding at the end of the bitstream.
fn safe_length_for_compressed_window_buf(k: usize) -> usize {
    // 11 bits of padding, due to 12-bit lookahead, with 1 bit certainly present.
    (12 * k + 11).div_ceil(32)
}

fn safe_length_for_compressed_pair_buf(k: usize, num_pairs: usize, num_base_bits: u8) -> usize {
    // let ybits = k + num_pairs; // simpler and safer UB
    // The following tighter UB on ybits is based on page 198
    // of the textbook "Managing Gigabytes" by Witten, Moffat, and Bell.
    // Notice that if num_base_bits == 0 it coincides with (k + num_pairs).
    let num_base_bits = usize::from(num_base_bits);
    let ybits = num_pairs * (1 + num_base_bits) + (k >> num_base_bits);
    let xbits = 12 * num_pairs;
    let padding = 10usize.saturating_sub(num_base_bits);
    (xbits + ybits + padding).div_ceil(32)
}

/// The largest `b >= 0` such that `count * 2^b` does not exceed `total`,
/// which matches the expected geometric mean of the row deltas so the unary
/// part of the Golomb code averages about one bit.
fn golomb_choose_number_of_base_bits(total: u64, count: u64) -> u8 {
    debug_assert!(total > 0);
    debug_assert!(count > 0);
    let quotient = (total - count) / count; // integer division
    if quotient == 0 { 0 } else { quotient.ilog2() as u8 }
}
