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

//! Coding tables for the window byte and pair codecs.
//!
//! All tables are process-wide immutable and materialized once, on first
//! use. They are derived from the statistical model of the sketch rather
//! than hand-entered: each pseudo-phase pins down a coupon density, the
//! density determines per-column bit probabilities of the bit matrix, and a
//! package-merge construction turns the resulting symbol weights into
//! length-limited canonical prefix codes capped at 12 bits.
//!
//! Table layout:
//! - encode entries are `(length << 12) | codeword`, with the codeword
//!   stored in emission order (its low bit is sent first);
//! - decode entries are `(length << 8) | symbol`, indexed by a 12-bit peek
//!   of the stream.

use std::sync::LazyLock;

/// 16 steady-state phases plus 6 midrange tables.
pub(crate) const NUM_TABLE_PHASES: usize = 22;
/// Longest codeword in bits; also the decoder's peek width.
const MAX_CODE_LENGTH: usize = 12;
const DECODE_TABLE_SIZE: usize = 1 << MAX_CODE_LENGTH;
/// Columns a 56-entry permutation covers: everything outside the window.
const NUM_CANONICAL_COLUMNS: usize = 56;

const MIN_SYMBOL_WEIGHT: f64 = 1e-12;

/// Byte encode tables, one per pseudo-phase.
pub(crate) static ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE: LazyLock<
    [[u16; 256]; NUM_TABLE_PHASES],
> = LazyLock::new(|| {
    std::array::from_fn(|phase| encoding_table_from_weights(&window_byte_weights(phase)))
});

/// Byte decode tables, one per pseudo-phase.
pub(crate) static DECODING_TABLES_FOR_HIGH_ENTROPY_BYTE: LazyLock<
    [[u16; DECODE_TABLE_SIZE]; NUM_TABLE_PHASES],
> = LazyLock::new(|| {
    std::array::from_fn(|phase| decoding_table(&ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE[phase]))
});

/// Length-limited unary code over the 65 possible column deltas.
pub(crate) static LENGTH_LIMITED_UNARY_ENCODING_TABLE65: LazyLock<[u16; 65]> =
    LazyLock::new(|| encoding_table_from_weights(&length_limited_unary_weights()));

pub(crate) static LENGTH_LIMITED_UNARY_DECODING_TABLE65: LazyLock<[u16; DECODE_TABLE_SIZE]> =
    LazyLock::new(|| decoding_table(&*LENGTH_LIMITED_UNARY_ENCODING_TABLE65));

/// Column permutations for the Sliding flavor, one per pseudo-phase.
///
/// Maps a rotated column to its delta-coding rank, so columns with many
/// surprising values cluster at small ranks.
pub(crate) static COLUMN_PERMUTATIONS_FOR_ENCODING: LazyLock<
    [[u8; NUM_CANONICAL_COLUMNS]; NUM_TABLE_PHASES],
> = LazyLock::new(|| std::array::from_fn(column_permutation));

pub(crate) static COLUMN_PERMUTATIONS_FOR_DECODING: LazyLock<
    [[u8; NUM_CANONICAL_COLUMNS]; NUM_TABLE_PHASES],
> = LazyLock::new(|| {
    std::array::from_fn(|phase| {
        let encoding = &COLUMN_PERMUTATIONS_FOR_ENCODING[phase];
        let mut decoding = [0u8; NUM_CANONICAL_COLUMNS];
        for (col, &mapped) in encoding.iter().enumerate() {
            decoding[mapped as usize] = col as u8;
        }
        decoding
    })
});

// ---------- statistical model ----------

/// Representative coupon densities (C/K) for the six midrange tables,
/// midpoints of the intervals the pseudo-phase selector carves out.
const MIDRANGE_DENSITIES: [f64; 6] = [0.625, 0.925, 1.21, 1.493, 1.816, 2.12];

/// The coupon density (C/K) the given pseudo-phase is trained for.
///
/// Steady-state phases slice one doubling period of the sliding regime into
/// sixteen; the window byte distribution is self-similar across periods, so
/// any single period is representative.
fn representative_coupon_density(phase: usize) -> f64 {
    if phase < 16 {
        19.0 / 8.0 + 1.0 + (phase as f64 + 0.5) / 16.0
    } else {
        MIDRANGE_DENSITIES[phase - 16]
    }
}

/// The window offset that goes with a coupon density, per the
/// `(8C - 19K) / 8K` rule.
fn representative_window_offset(density: f64) -> i32 {
    ((density - 19.0 / 8.0).floor() as i32).max(0)
}

/// Probability that column `col` of a row is set after an update intensity
/// of `mu` items per row.
fn column_set_probability(mu: f64, col: i32) -> f64 {
    1.0 - (-mu / 2f64.powi(col + 1)).exp()
}

/// Expected coupon density produced by update intensity `mu`.
fn expected_coupon_density(mu: f64) -> f64 {
    (0..64).map(|col| column_set_probability(mu, col)).sum()
}

/// Inverts [`expected_coupon_density`] by bisection on a log scale.
fn solve_update_intensity(target_density: f64) -> f64 {
    debug_assert!(target_density > 0.0);
    let mut lo = 1e-9f64;
    let mut hi = 2f64.powi(80);
    for _ in 0..200 {
        let mid = (lo * hi).sqrt();
        if expected_coupon_density(mid) < target_density {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo * hi).sqrt()
}

fn window_bit_probabilities(phase: usize) -> [f64; 8] {
    let density = representative_coupon_density(phase);
    let mu = solve_update_intensity(density);
    let offset = representative_window_offset(density);
    std::array::from_fn(|bit| {
        column_set_probability(mu, offset + bit as i32).clamp(1e-6, 1.0 - 1e-6)
    })
}

/// Expected relative frequency of each window byte value for one phase:
/// the product of its eight bits' probabilities.
fn window_byte_weights(phase: usize) -> [f64; 256] {
    let bit_p = window_bit_probabilities(phase);
    std::array::from_fn(|byte| {
        let mut weight = 1.0f64;
        for (bit, p) in bit_p.iter().enumerate() {
            weight *= if byte >> bit & 1 == 1 { *p } else { 1.0 - *p };
        }
        weight.max(MIN_SYMBOL_WEIGHT)
    })
}

/// Geometric weights: delta `d` is twice as likely as `d + 1`, which is
/// what makes the resulting code a length-limited unary code. Strictly
/// decreasing weights also keep the code lengths monotone in the symbol.
fn length_limited_unary_weights() -> [f64; 65] {
    std::array::from_fn(|symbol| 2f64.powi(-(symbol as i32) - 1))
}

/// Ranks the 56 out-of-window columns of one phase by how often they hold a
/// surprising value.
///
/// Canonical column 0 sits just past the window's high edge; large
/// canonical values wrap around to the columns below the window, where a
/// surprise is a bit that failed to be set.
fn column_permutation(phase: usize) -> [u8; NUM_CANONICAL_COLUMNS] {
    let density = representative_coupon_density(phase);
    let mu = solve_update_intensity(density);
    let offset = representative_window_offset(density);

    let surprise_density = |canonical: usize| -> f64 {
        let actual = (canonical as i32 + offset + 8) & 63;
        let set_p = column_set_probability(mu, actual);
        if actual < offset { 1.0 - set_p } else { set_p }
    };

    let mut order: Vec<usize> = (0..NUM_CANONICAL_COLUMNS).collect();
    order.sort_by(|&a, &b| {
        surprise_density(b)
            .partial_cmp(&surprise_density(a))
            .unwrap()
            .then(a.cmp(&b))
    });

    let mut permutation = [0u8; NUM_CANONICAL_COLUMNS];
    for (rank, &canonical) in order.iter().enumerate() {
        permutation[canonical] = rank as u8;
    }
    permutation
}

// ---------- length-limited canonical prefix codes ----------

fn encoding_table_from_weights<const N: usize>(weights: &[f64; N]) -> [u16; N] {
    let lengths = length_limited_code_lengths(weights);
    encoding_table_from_lengths(&lengths)
}

/// Optimal code lengths capped at [`MAX_CODE_LENGTH`] bits (package-merge).
///
/// Every weight must be positive and finite, and `N` must fit the cap.
fn length_limited_code_lengths<const N: usize>(weights: &[f64; N]) -> [u8; N] {
    debug_assert!(N >= 2 && N <= 1 << MAX_CODE_LENGTH);

    let mut singletons: Vec<(f64, Vec<u16>)> = weights
        .iter()
        .enumerate()
        .map(|(symbol, &weight)| (weight, vec![symbol as u16]))
        .collect();
    singletons.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut current = singletons.clone();
    for _ in 1..MAX_CODE_LENGTH {
        let packages: Vec<(f64, Vec<u16>)> = current
            .chunks_exact(2)
            .map(|pair| {
                let mut symbols = pair[0].1.clone();
                symbols.extend_from_slice(&pair[1].1);
                (pair[0].0 + pair[1].0, symbols)
            })
            .collect();
        current = singletons.clone();
        current.extend(packages);
        current.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    }

    // A symbol's code length is how many of the 2(N - 1) cheapest entries
    // of the final list contain it.
    let mut lengths = [0u8; N];
    for (_, symbols) in current.iter().take(2 * (N - 1)) {
        for &symbol in symbols {
            lengths[symbol as usize] += 1;
        }
    }
    lengths
}

/// Assigns canonical codewords to the given lengths, bit-reversed into
/// emission order.
fn encoding_table_from_lengths<const N: usize>(lengths: &[u8; N]) -> [u16; N] {
    let mut bl_count = [0u32; MAX_CODE_LENGTH + 1];
    for &len in lengths {
        bl_count[len as usize] += 1;
    }

    let mut next_code = [0u32; MAX_CODE_LENGTH + 1];
    let mut code = 0u32;
    for bits in 1..=MAX_CODE_LENGTH {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    std::array::from_fn(|symbol| {
        let len = lengths[symbol];
        debug_assert!(
            (1..=MAX_CODE_LENGTH as u8).contains(&len),
            "bad code length {len} for symbol {symbol}"
        );
        let canonical = next_code[len as usize];
        next_code[len as usize] += 1;
        debug_assert!(canonical >> len == 0, "canonical code overflows its length");
        ((u16::from(len)) << 12) | reverse_bits(canonical, len) as u16
    })
}

/// Expands an encode table into a decode table indexed by a 12-bit peek.
fn decoding_table<const N: usize>(encoding_table: &[u16; N]) -> [u16; DECODE_TABLE_SIZE] {
    let mut table = [0u16; DECODE_TABLE_SIZE];
    for (symbol, &entry) in encoding_table.iter().enumerate() {
        let len = (entry >> 12) as u8;
        let code = u32::from(entry & 0xfff);
        // every peek whose low bits equal the codeword decodes to it
        let step = 1u32 << len;
        let mut index = code;
        while index < DECODE_TABLE_SIZE as u32 {
            table[index as usize] = (u16::from(len) << 8) | symbol as u16;
            index += step;
        }
    }
    table
}

fn reverse_bits(code: u32, len: u8) -> u32 {
    let mut reversed = 0u32;
    for bit in 0..len {
        reversed |= (code >> bit & 1) << (len - 1 - bit);
    }
    reversed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_code<const N: usize>(
        encoding_table: &[u16; N],
        decoding_table: &[u16; DECODE_TABLE_SIZE],
    ) {
        let mut kraft = 0.0f64;
        for (symbol, &entry) in encoding_table.iter().enumerate() {
            let len = (entry >> 12) as u8;
            let code = u32::from(entry & 0xfff);
            assert!(
                (1..=MAX_CODE_LENGTH as u8).contains(&len),
                "symbol {symbol} has length {len}"
            );
            assert!(code >> len == 0, "symbol {symbol} code wider than its length");
            kraft += 2f64.powi(-i32::from(len));

            // a peek with arbitrary junk above the codeword still decodes it
            for filler in [0u32, (DECODE_TABLE_SIZE as u32 - 1) >> len] {
                let lookup = decoding_table[(code | (filler << len)) as usize];
                assert_eq!((lookup >> 8) as u8, len, "length mismatch for {symbol}");
                assert_eq!((lookup & 0xff) as usize, symbol, "symbol mismatch");
            }
        }
        assert!(kraft <= 1.0 + 1e-9, "code is not prefix-free: kraft = {kraft}");
    }

    #[test]
    fn test_byte_tables_are_self_consistent() {
        for phase in 0..NUM_TABLE_PHASES {
            validate_code(
                &ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE[phase],
                &DECODING_TABLES_FOR_HIGH_ENTROPY_BYTE[phase],
            );
        }
    }

    #[test]
    fn test_length_limited_unary_table_is_self_consistent() {
        validate_code(
            &*LENGTH_LIMITED_UNARY_ENCODING_TABLE65,
            &*LENGTH_LIMITED_UNARY_DECODING_TABLE65,
        );

        // geometric weights decay with the symbol, so lengths never shrink
        let lengths: Vec<u8> = LENGTH_LIMITED_UNARY_ENCODING_TABLE65
            .iter()
            .map(|&entry| (entry >> 12) as u8)
            .collect();
        assert!(lengths.is_sorted(), "lengths not monotone: {lengths:?}");
    }

    #[test]
    fn test_column_permutations_invert() {
        for phase in 0..NUM_TABLE_PHASES {
            let encoding = &COLUMN_PERMUTATIONS_FOR_ENCODING[phase];
            let decoding = &COLUMN_PERMUTATIONS_FOR_DECODING[phase];
            for col in 0..NUM_CANONICAL_COLUMNS as u8 {
                assert_eq!(decoding[encoding[col as usize] as usize], col);
                assert_eq!(encoding[decoding[col as usize] as usize], col);
            }
        }
    }

    #[test]
    fn test_steady_phases_cover_distinct_densities() {
        for phase in 1..16 {
            assert!(
                representative_coupon_density(phase) > representative_coupon_density(phase - 1)
            );
        }
        for phase in 17..NUM_TABLE_PHASES {
            assert!(
                representative_coupon_density(phase) > representative_coupon_density(phase - 1)
            );
        }
    }

    #[test]
    fn test_intensity_solver_inverts_density() {
        for density in [0.625, 1.0, 2.12, 3.4, 4.3] {
            let mu = solve_update_intensity(density);
            let recovered = expected_coupon_density(mu);
            assert!(
                (recovered - density).abs() < 1e-6,
                "density {density} recovered as {recovered}"
            );
        }
    }
}
