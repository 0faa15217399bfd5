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

/// A specialized hash table holding surprising-value positions.
///
/// Each entry is a pair code `(row << 6) | col` locating one set bit of the
/// sketch's bit matrix outside its sliding window. Slots are probed
/// linearly starting from the high bits of the pair code, so the physical
/// layout approximates the sorted order of the entries and extraction
/// comes back nearly sorted.
#[derive(Debug, Clone)]
pub struct PairTable {
    /// Significant low bits of a pair code, `6 + lgK` for this codec.
    num_valid_bits: u8,
    num_items: u32,
    /// `u32::MAX` marks an empty slot; the length is always a power of two.
    slots: Vec<u32>,
}

impl PairTable {
    /// Creates an empty table with `1 << lg_size` slots for pair codes of
    /// `num_valid_bits` significant bits.
    pub fn new(lg_size: u8, num_valid_bits: u8) -> Self {
        assert!(
            (2..=26).contains(&lg_size),
            "lg_size must be in [2, 26], got {lg_size}"
        );
        assert!(
            ((lg_size + 1)..=32).contains(&num_valid_bits),
            "num_valid_bits must be in [lg_size + 1, 32], got {num_valid_bits} where lg_size = {lg_size}"
        );
        Self {
            num_valid_bits,
            num_items: 0,
            slots: vec![u32::MAX; 1 << lg_size],
        }
    }

    /// Rebuilds a table from an array of decoded pairs.
    ///
    /// The slot count is derived from `pairs.len()` up front, so insertion
    /// never grows the table and the probe clusters stay short even though
    /// the pairs arrive sorted.
    pub fn from_pairs(lg_k: u8, pairs: &[u32]) -> Self {
        let mut lg_size = 2;
        while pairs.len() * 4 > 3 << lg_size {
            lg_size += 1;
        }

        let mut table = Self::new(lg_size, 6 + lg_k);
        for &pair in pairs {
            let inserted = table.maybe_insert(pair);
            assert!(inserted, "duplicate pair {pair} in decoded stream");
        }
        table
    }

    /// The number of pairs in the table.
    pub fn num_items(&self) -> u32 {
        self.num_items
    }

    /// Inserts `item` unless it is already present. Returns whether the
    /// table changed.
    pub fn maybe_insert(&mut self, item: u32) -> bool {
        let mask = self.slots.len() - 1;
        let mut probe = (item >> self.probe_shift()) as usize;
        assert!(
            probe <= mask,
            "item {item} has bits above num_valid_bits = {}",
            self.num_valid_bits
        );
        loop {
            let slot = self.slots[probe];
            if slot == item {
                return false;
            }
            if slot == u32::MAX {
                break;
            }
            probe = (probe + 1) & mask;
        }
        self.slots[probe] = item;
        self.num_items += 1;
        // grow at 3/4 load
        if self.num_items as usize * 4 > self.slots.len() * 3 {
            self.grow();
        }
        true
    }

    /// Drains the slots in an order that undoes the probe wrap-around, so
    /// the result is nearly sorted as long as the table isn't too full.
    ///
    /// An entry sitting before the first empty slot that hashes into the
    /// top half of the key space can only have gotten there by probing
    /// past the end of the table, so it is emitted after everything else.
    /// A very high load factor can defeat the heuristic; the sort that
    /// follows extraction fixes up whatever it misses.
    pub fn unwrapping_get_items(&self) -> Vec<u32> {
        let mut items = Vec::with_capacity(self.num_items as usize);
        let mut wrapped = vec![];
        let hi_bit = 1 << (self.num_valid_bits - 1);
        let mut in_leading_cluster = true;
        for &slot in &self.slots {
            if slot == u32::MAX {
                in_leading_cluster = false;
            } else if in_leading_cluster && slot & hi_bit != 0 {
                wrapped.push(slot);
            } else {
                items.push(slot);
            }
        }
        items.extend_from_slice(&wrapped);
        debug_assert_eq!(items.len(), self.num_items as usize);
        items
    }

    fn probe_shift(&self) -> u8 {
        self.num_valid_bits - self.slots.len().trailing_zeros() as u8
    }

    /// Doubles the slot count and rehashes. `num_items` is unchanged.
    fn grow(&mut self) {
        let new_size = self.slots.len() * 2;
        let lg_size = new_size.trailing_zeros() as u8;
        assert!(
            lg_size < self.num_valid_bits && lg_size <= 26,
            "table cannot grow past its key width or 2^26 slots"
        );

        let old = std::mem::replace(&mut self.slots, vec![u32::MAX; new_size]);
        let shift = self.probe_shift();
        let mask = new_size - 1;
        for item in old {
            if item == u32::MAX {
                continue;
            }
            // no duplicates can turn up during a rehash
            let mut probe = (item >> shift) as usize;
            while self.slots[probe] != u32::MAX {
                probe = (probe + 1) & mask;
            }
            self.slots[probe] = item;
        }
    }
}

/// Sorts the output of [`PairTable::unwrapping_get_items`].
///
/// Extraction leaves the array nearly sorted, where insertion sort runs in
/// linear time with a small constant. A displacement budget guards the
/// quadratic worst case: once the total movement exceeds a constant
/// multiple of the length, the remaining work is handed to a shell sort.
pub fn introspective_insertion_sort(a: &mut [u32]) {
    let mut budget = 8 * a.len();
    for i in 1..a.len() {
        let value = a[i];
        let mut j = i;
        while j > 0 && a[j - 1] > value {
            a[j] = a[j - 1];
            j -= 1;
        }
        a[j] = value;
        let moved = i - j;
        if moved > budget {
            shell_sort(a);
            return;
        }
        budget -= moved;
    }
}

/// Shell sort with Knuth's 3h + 1 gap sequence.
fn shell_sort(a: &mut [u32]) {
    let mut gap = 1;
    while gap * 3 + 1 < a.len() {
        gap = gap * 3 + 1;
    }
    while gap > 0 {
        for i in gap..a.len() {
            let value = a[i];
            let mut j = i;
            while j >= gap && a[j - gap] > value {
                a[j] = a[j - gap];
                j -= gap;
            }
            a[j] = value;
        }
        gap /= 3;
    }
}
