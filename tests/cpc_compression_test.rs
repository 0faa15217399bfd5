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

use std::collections::BTreeSet;

use cpc_compression::CompressedState;
use cpc_compression::Flavor;
use cpc_compression::PairTable;
use cpc_compression::UncompressedState;
use cpc_compression::determine_flavor;
use cpc_compression::determine_window_offset;
use cpc_compression::error::ErrorKind;
use cpc_compression::introspective_insertion_sort;
use googletest::assert_that;
use googletest::prelude::le;

fn make_state(
    lg_k: u8,
    num_coupons: u32,
    window_offset: u8,
    sliding_window: Vec<u8>,
    pairs: &[u32],
) -> UncompressedState {
    let mut state = UncompressedState::new(lg_k);
    state.num_coupons = num_coupons;
    state.window_offset = window_offset;
    state.sliding_window = sliding_window;
    for &pair in pairs {
        assert!(
            state.surprising_value_table.maybe_insert(pair),
            "test data must not contain duplicate pairs"
        );
    }
    state
}

fn sorted_items(table: &PairTable) -> Vec<u32> {
    let mut items = table.unwrapping_get_items();
    introspective_insertion_sort(&mut items);
    items
}

fn assert_round_trip(source: &UncompressedState, flavor: Flavor) -> CompressedState {
    let compressed = CompressedState::compress(source, flavor);
    assert_eq!(compressed.lg_k, source.lg_k);
    assert_eq!(compressed.num_coupons, source.num_coupons);
    assert_eq!(compressed.window_offset, source.window_offset);
    assert_that!(compressed.cw_length, le(compressed.compressed_window.len()));
    assert_that!(
        compressed.csv_length,
        le(compressed.compressed_surprising_values.len())
    );

    let restored = compressed.uncompress(flavor).unwrap();
    assert_eq!(restored.lg_k, source.lg_k);
    assert_eq!(restored.num_coupons, source.num_coupons);
    assert_eq!(restored.window_offset, source.window_offset);
    assert_eq!(restored.sliding_window, source.sliding_window);
    assert_eq!(
        sorted_items(&restored.surprising_value_table),
        sorted_items(&source.surprising_value_table)
    );
    compressed
}

/// Distinct random pairs whose columns satisfy the given predicate.
fn random_pairs(lg_k: u8, count: usize, col_ok: impl Fn(u32) -> bool) -> Vec<u32> {
    let mut pairs = BTreeSet::new();
    while pairs.len() < count {
        let row = rand::random_range(0..1u32 << lg_k);
        let col = rand::random_range(0..64u32);
        if col_ok(col) {
            pairs.insert((row << 6) | col);
        }
    }
    pairs.into_iter().collect()
}

fn random_window(lg_k: u8) -> Vec<u8> {
    (0..1usize << lg_k).map(|_| rand::random_range(0..=255)).collect()
}

#[test]
fn test_empty_flavor() {
    let source = make_state(10, 0, 0, vec![], &[]);
    assert_eq!(determine_flavor(10, 0), Flavor::Empty);

    let compressed = assert_round_trip(&source, Flavor::Empty);
    assert!(compressed.compressed_window.is_empty());
    assert!(compressed.compressed_surprising_values.is_empty());
    assert_eq!(compressed.cw_length, 0);
    assert_eq!(compressed.csv_length, 0);
    assert_eq!(compressed.num_compressed_surprising_values, 0);

    let restored = compressed.uncompress(Flavor::Empty).unwrap();
    assert_eq!(restored.surprising_value_table.num_items(), 0);
    assert!(restored.sliding_window.is_empty());
}

#[test]
fn test_sparse_single_pair() {
    let pair = (5u32 << 6) | 3;
    let source = make_state(10, 1, 0, vec![], &[pair]);
    assert_eq!(determine_flavor(10, 1), Flavor::Sparse);

    let compressed = assert_round_trip(&source, Flavor::Sparse);
    assert!(compressed.compressed_window.is_empty());
    assert_eq!(compressed.num_compressed_surprising_values, 1);

    let restored = compressed.uncompress(Flavor::Sparse).unwrap();
    assert_eq!(sorted_items(&restored.surprising_value_table), vec![pair]);
}

#[test]
fn test_sparse_random_round_trips() {
    for lg_k in [4u8, 8, 11, 14] {
        let k = 1u32 << lg_k;
        let num_coupons = (3 * k / 32).max(2) - 1;
        let pairs = random_pairs(lg_k, num_coupons as usize, |_| true);
        let source = make_state(lg_k, num_coupons, 0, vec![], &pairs);
        assert_round_trip(&source, determine_flavor(lg_k, num_coupons));
    }
}

#[test]
fn test_hybrid_window_bits_become_pairs() {
    let lg_k = 8;
    let k = 1usize << lg_k;
    // bit 0 set in the first 64 rows; 64 coupons in 256 rows is hybrid
    let mut window = vec![0u8; k];
    window[..64].fill(0x01);
    assert_eq!(determine_flavor(lg_k, 64), Flavor::Hybrid);

    let source = make_state(lg_k, 64, 0, window.clone(), &[]);
    let compressed = assert_round_trip(&source, Flavor::Hybrid);
    assert!(compressed.compressed_window.is_empty());
    assert_eq!(compressed.num_compressed_surprising_values, 64);

    let restored = compressed.uncompress(Flavor::Hybrid).unwrap();
    assert_eq!(restored.sliding_window, window);
    assert_eq!(restored.surprising_value_table.num_items(), 0);
}

#[test]
fn test_hybrid_random_round_trips() {
    for lg_k in [6u8, 10, 12] {
        let k = 1usize << lg_k;
        // window bits only in columns 0..8, table pairs only at column 8+
        let window: Vec<u8> = (0..k)
            .map(|_| if rand::random_range(0..4) == 0 { rand::random_range(1..=255) } else { 0 })
            .collect();
        let window_bits: u32 = window.iter().map(|byte| byte.count_ones()).sum();
        let table_pairs = random_pairs(lg_k, k / 50 + 1, |col| col >= 8);
        let num_coupons = window_bits + table_pairs.len() as u32;

        let source = make_state(lg_k, num_coupons, 0, window, &table_pairs);
        assert_round_trip(&source, Flavor::Hybrid);
    }
}

#[test]
fn test_pinned_with_surprising_values() {
    let lg_k = 12;
    let pairs = random_pairs(lg_k, 30, |col| col >= 8);
    let source = make_state(lg_k, 100, 0, random_window(lg_k), &pairs);

    let compressed = assert_round_trip(&source, Flavor::Pinned);
    assert!(!compressed.compressed_window.is_empty());
    assert_eq!(compressed.num_compressed_surprising_values, 30);

    // With k = 4096 and 30 pairs the Golomb parameter is 7, so the coded
    // size is bounded by 12 bits per column delta, (1 + 7) bits plus an
    // amortized k/2^7 unary share per row delta, and 3 bits of padding.
    let bound_bits: usize = 12 * 30 + 30 * (1 + 7) + (4096 >> 7) + 3;
    assert_that!(compressed.csv_length, le(bound_bits.div_ceil(32)));
}

#[test]
fn test_pinned_without_surprising_values() {
    let lg_k = 10;
    let k = 1u32 << lg_k;
    let num_coupons = k; // K/2 <= C < 27K/8
    assert_eq!(determine_flavor(lg_k, num_coupons), Flavor::Pinned);
    assert_eq!(determine_window_offset(lg_k, num_coupons), 0);

    let source = make_state(lg_k, num_coupons, 0, random_window(lg_k), &[]);
    let compressed = assert_round_trip(&source, Flavor::Pinned);
    assert!(!compressed.compressed_window.is_empty());
    assert!(compressed.compressed_surprising_values.is_empty());
    assert_eq!(compressed.num_compressed_surprising_values, 0);

    // the table comes back empty but present
    let restored = compressed.uncompress(Flavor::Pinned).unwrap();
    assert_eq!(restored.surprising_value_table.num_items(), 0);
}

#[test]
fn test_pinned_random_round_trips() {
    for lg_k in [5u8, 9, 13] {
        let k = 1u32 << lg_k;
        let num_coupons = rand::random_range(k / 2..27 * k / 8);
        let offset = determine_window_offset(lg_k, num_coupons);
        assert_eq!(offset, 0, "pinned sketches keep the window at offset zero");

        let pairs = random_pairs(lg_k, (k / 40 + 1) as usize, |col| col >= 8);
        let source = make_state(lg_k, num_coupons, offset, random_window(lg_k), &pairs);
        assert_round_trip(&source, Flavor::Pinned);
    }
}

#[test]
fn test_sliding_round_trip_with_offset_seven() {
    let lg_k = 12;
    let num_coupons = 3000;
    let window_offset = 7u8;
    // every surprising column lies above the window
    let pairs = random_pairs(lg_k, 500, |col| col >= 15);
    let source = make_state(lg_k, num_coupons, window_offset, random_window(lg_k), &pairs);

    assert_round_trip(&source, Flavor::Sliding);
}

#[test]
fn test_sliding_random_round_trips() {
    for lg_k in [6u8, 10, 12] {
        let k = 1u32 << lg_k;
        let num_coupons = rand::random_range(27 * k / 8..8 * k);
        let offset = determine_window_offset(lg_k, num_coupons);
        assert!((1..=56).contains(&offset), "offset {offset} for C = {num_coupons}");

        // surprising values live outside the window, on either fringe
        let window_cols = u32::from(offset)..u32::from(offset) + 8;
        let pairs = random_pairs(lg_k, (k / 30 + 1) as usize, |col| !window_cols.contains(&col));
        let source = make_state(lg_k, num_coupons, offset, random_window(lg_k), &pairs);
        assert_round_trip(&source, Flavor::Sliding);
    }
}

#[test]
fn test_sliding_without_surprising_values() {
    let lg_k = 8;
    let k = 1u32 << lg_k;
    let num_coupons = 4 * k;
    assert_eq!(determine_flavor(lg_k, num_coupons), Flavor::Sliding);
    let offset = determine_window_offset(lg_k, num_coupons);

    let source = make_state(lg_k, num_coupons, offset, random_window(lg_k), &[]);
    let compressed = assert_round_trip(&source, Flavor::Sliding);
    assert_eq!(compressed.num_compressed_surprising_values, 0);
}

#[test]
fn test_uncompress_rejects_truncated_pair_stream() {
    let pairs = random_pairs(10, 20, |_| true);
    let source = make_state(10, 20, 0, vec![], &pairs);
    let mut compressed = CompressedState::compress(&source, Flavor::Sparse);

    compressed.compressed_surprising_values.clear();
    compressed.csv_length = 0;
    let err = compressed.uncompress(Flavor::Sparse).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_uncompress_rejects_length_beyond_buffer() {
    let source = make_state(10, 1, 0, vec![], &[(3 << 6) | 9]);
    let mut compressed = CompressedState::compress(&source, Flavor::Sparse);

    compressed.csv_length = compressed.compressed_surprising_values.len() + 1;
    let err = compressed.uncompress(Flavor::Sparse).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_uncompress_rejects_zero_entry_pair_stream() {
    let source = make_state(10, 1, 0, vec![], &[(3 << 6) | 9]);
    let mut compressed = CompressedState::compress(&source, Flavor::Sparse);

    compressed.num_compressed_surprising_values = 0;
    let err = compressed.uncompress(Flavor::Sparse).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_uncompress_rejects_bad_window_offset() {
    let source = make_state(10, 0, 0, vec![], &[]);
    let mut compressed = CompressedState::compress(&source, Flavor::Empty);

    compressed.window_offset = 57;
    let err = compressed.uncompress(Flavor::Empty).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}
