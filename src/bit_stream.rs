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

//! Bit-level primitives shared by the byte and pair codecs.
//!
//! Codewords are packed least-significant-bit first: bit 0 of word 0 is the
//! first bit of the stream. Both directions run through a 64-bit shift
//! register so a codeword of up to 32 bits never straddles more than one
//! word boundary per operation.

use crate::error::Error;

/// Appends variable-length codes to a 32-bit word buffer.
///
/// The caller provides a buffer at least as large as the relevant
/// `safe_length_for_*` bound; the writer never reallocates.
pub(crate) struct BitWriter<'a> {
    words: &'a mut [u32],
    next_word_index: usize,
    /// The low `buf_bits` bits are pending output.
    bit_buf: u64,
    /// In `[0, 32)` between operations.
    buf_bits: u8,
}

impl<'a> BitWriter<'a> {
    pub fn new(words: &'a mut [u32]) -> Self {
        Self {
            words,
            next_word_index: 0,
            bit_buf: 0,
            buf_bits: 0,
        }
    }

    /// Appends the low `code_len` bits of `code_val`.
    ///
    /// `code_val` must not have bits set at or above `code_len`.
    pub fn write(&mut self, code_val: u64, code_len: u8) {
        debug_assert!(code_len <= 32, "code length too large: {code_len}");
        debug_assert!(code_val >> code_len == 0, "stray bits above the code");
        self.bit_buf |= code_val << self.buf_bits;
        self.buf_bits += code_len;
        self.maybe_flush();
    }

    /// Appends `value` zero bits followed by a single one bit.
    pub fn write_unary(&mut self, value: u64) {
        let mut remaining = value;
        while remaining >= 16 {
            remaining -= 16;
            // The zeros are already present in bit_buf, so only the bit
            // count needs to move.
            self.buf_bits += 16;
            self.maybe_flush();
        }
        self.write(1 << remaining, remaining as u8 + 1);
    }

    /// Appends `count` zero bits of padding.
    pub fn pad(&mut self, count: u8) {
        debug_assert!(count <= 16, "padding too large: {count}");
        self.buf_bits += count;
        self.maybe_flush();
    }

    /// Flushes any pending bits and returns the number of words written.
    pub fn finish(mut self) -> usize {
        if self.buf_bits > 0 {
            debug_assert!(self.buf_bits < 32);
            self.words[self.next_word_index] = self.bit_buf as u32;
            self.next_word_index += 1;
        }
        self.next_word_index
    }

    fn maybe_flush(&mut self) {
        if self.buf_bits >= 32 {
            self.words[self.next_word_index] = self.bit_buf as u32;
            self.next_word_index += 1;
            self.bit_buf >>= 32;
            self.buf_bits -= 32;
        }
    }
}

/// Consumes variable-length codes from a 32-bit word buffer.
///
/// The slice handed to `new` must cover exactly the used portion of the
/// stream; running off its end reports a truncation error instead of
/// reading stale buffer contents.
pub(crate) struct BitReader<'a> {
    words: &'a [u32],
    next_word_index: usize,
    bit_buf: u64,
    buf_bits: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            next_word_index: 0,
            bit_buf: 0,
            buf_bits: 0,
        }
    }

    /// Makes at least `min_bits` available for [`Self::peek`].
    ///
    /// `min_bits` must not exceed 32.
    pub fn ensure(&mut self, min_bits: u8) -> Result<(), Error> {
        debug_assert!(min_bits <= 32, "peek request too large: {min_bits}");
        if self.buf_bits < min_bits {
            let word = *self.words.get(self.next_word_index).ok_or_else(|| {
                Error::invalid_data("compressed stream is truncated")
                    .with_context("word_index", self.next_word_index)
            })?;
            self.bit_buf |= u64::from(word) << self.buf_bits;
            self.next_word_index += 1;
            self.buf_bits += 32;
        }
        Ok(())
    }

    /// Returns the next `bits` bits without consuming them.
    pub fn peek(&self, bits: u8) -> u64 {
        debug_assert!(bits <= self.buf_bits, "peek past the shift register");
        self.bit_buf & ((1u64 << bits) - 1)
    }

    /// Drops `len` previously peeked bits.
    pub fn consume(&mut self, len: u8) {
        debug_assert!(len <= self.buf_bits, "consume past the shift register");
        self.bit_buf >>= len;
        self.buf_bits -= len;
    }

    /// Reads one unary codeword: the count of zero bits before the next
    /// one bit.
    pub fn read_unary(&mut self) -> Result<u64, Error> {
        let mut subtotal = 0u64;
        loop {
            self.ensure(8)?;
            // These 8 bits include either all or part of the unary codeword.
            let peek8 = (self.bit_buf & 0xff) as u32;
            let trailing_zeros = peek8.trailing_zeros() as u8;
            if trailing_zeros < 8 {
                self.consume(trailing_zeros + 1);
                return Ok(subtotal + u64::from(trailing_zeros));
            }
            // The codeword was partial, so read some more.
            subtotal += 8;
            self.consume(8);
        }
    }

    /// The number of whole words pulled from the input so far.
    pub fn words_consumed(&self) -> usize {
        self.next_word_index
    }
}
