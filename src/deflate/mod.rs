//! DEFLATE block machine (spec §4.J, RFC 1951).

use std::io::Read;

use crate::bitstream::LsbReader;
use crate::dictionary::SlidingDictionary;
use crate::error::{ErrorContext, Poison, Res};
use crate::prefix::PrefixDecoder;
use crate::tables::{RangeTable, DEFLATE_DISTANCE, DEFLATE_LENGTH};

const WINDOW: usize = 32 * 1024;

const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

enum State {
    BlockStart,
    Stored { remaining: u16 },
    Compressed {
        lit: PrefixDecoder,
        dist: PrefixDecoder,
        copy: Option<(u64, usize)>,
    },
    Finished,
}

/// Streaming RFC 1951 DEFLATE decoder. `read` drains bytes already produced
/// into the sliding window before running the block state machine further,
/// so a 1-byte buffer and a large one observe the same byte sequence.
pub struct Decoder<R> {
    bits: LsbReader<R>,
    dict: SlidingDictionary,
    state: State,
    final_seen: bool,
    poison: Poison,
    output_offset: u64,
}

impl<R: Read> Decoder<R> {
    pub fn new(source: R) -> Self {
        Decoder {
            bits: LsbReader::new(source),
            dict: SlidingDictionary::new(WINDOW),
            state: State::BlockStart,
            final_seen: false,
            poison: Poison::default(),
            output_offset: 0,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.poison.check()?;
        let mut written = 0;
        while written < buf.len() {
            let chunk = self.dict.read_flush(buf.len() - written);
            if !chunk.is_empty() {
                let n = chunk.len();
                buf[written..written + n].copy_from_slice(chunk);
                written += n;
                continue;
            }
            if matches!(self.state, State::Finished) {
                break;
            }
            if let Err(e) = self.step() {
                return Err(self.poison.record(e));
            }
        }
        self.output_offset += written as u64;
        Ok(written)
    }

    pub fn close(&mut self) {
        self.poison.close();
    }

    pub fn input_offset(&self) -> u64 {
        self.bits.offset()
    }

    pub fn output_offset(&self) -> u64 {
        self.output_offset
    }

    /// Advances the block machine by one unit of work: one literal/length
    /// symbol, one header parse, or a bounded slice of a stored block or
    /// pending copy. Keeping these units small is what makes `read` safe
    /// to call with tiny buffers.
    fn step(&mut self) -> Res<()> {
        match &mut self.state {
            State::BlockStart => self.start_block(),
            State::Stored { remaining } => {
                let remaining = *remaining;
                self.continue_stored(remaining)
            }
            State::Compressed { .. } => self.continue_compressed(),
            State::Finished => Ok(()),
        }
    }

    fn start_block(&mut self) -> Res<()> {
        let final_bit = self.bits.read_bits(1)?;
        self.final_seen = final_bit != 0;
        let kind = self.bits.read_bits(2)?;
        log::trace!("deflate: block header, type {kind}, final {}", self.final_seen);
        match kind {
            0 => {
                self.bits.read_pads()?;
                let mut len_bytes = [0u8; 4];
                self.bits.read_bytes(&mut len_bytes)?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]);
                let nlen = u16::from_le_bytes([len_bytes[2], len_bytes[3]]);
                self.assert_eq(len, !nlen)?;
                self.state = State::Stored { remaining: len };
                Ok(())
            }
            1 => {
                let (lit, dist) = fixed_trees()?;
                self.state = State::Compressed {
                    lit,
                    dist,
                    copy: None,
                };
                Ok(())
            }
            2 => {
                let (lit, dist) = self.read_dynamic_trees()?;
                self.state = State::Compressed {
                    lit,
                    dist,
                    copy: None,
                };
                Ok(())
            }
            _ => self.corrupted("reserved block type 3"),
        }
    }

    fn continue_stored(&mut self, remaining: u16) -> Res<()> {
        if remaining == 0 {
            self.state = if self.final_seen {
                State::Finished
            } else {
                State::BlockStart
            };
            return Ok(());
        }
        let room = self.dict.avail_size().min(remaining as usize).max(1);
        let slice = self.dict.write_slice(room);
        let n = slice.len();
        self.bits.read_bytes(slice)?;
        self.dict.write_mark(n);
        self.state = State::Stored {
            remaining: remaining - n as u16,
        };
        Ok(())
    }

    fn continue_compressed(&mut self) -> Res<()> {
        // Finish a pending back-reference copy first; `write_copy` may
        // stop short at the ring's physical tail, in which case we resume
        // on the next call with the remainder.
        let pending = match &self.state {
            State::Compressed { copy, .. } => *copy,
            _ => unreachable!(),
        };
        if let Some((dist, remaining)) = pending {
            let n = self.dict.write_copy(dist, remaining)?;
            if let State::Compressed { copy, .. } = &mut self.state {
                *copy = if n < remaining {
                    Some((dist, remaining - n))
                } else {
                    None
                };
            }
            return Ok(());
        }

        let sym = {
            let lit = match &self.state {
                State::Compressed { lit, .. } => lit,
                _ => unreachable!(),
            };
            self.bits.read_symbol(lit)?
        };
        if sym < 256 {
            self.dict.write_byte(sym as u8);
            return Ok(());
        }
        if sym == 256 {
            self.state = if self.final_seen {
                State::Finished
            } else {
                State::BlockStart
            };
            return Ok(());
        }
        let length_idx = sym as usize - 257;
        let length_table: &[RangeTable] = &DEFLATE_LENGTH;
        self.assert(length_idx < length_table.len(), "invalid length code")?;
        let len = self.bits.read_offset(length_idx, length_table)?;

        let dist_sym = {
            let dist = match &self.state {
                State::Compressed { dist, .. } => dist,
                _ => unreachable!(),
            };
            self.bits.read_symbol(dist)?
        };
        self.assert(dist_sym < 30, "invalid distance code")?;
        let dist_table: &[RangeTable] = &DEFLATE_DISTANCE;
        let distance = self.bits.read_offset(dist_sym as usize, dist_table)?;

        let n = self.dict.write_copy(distance, len as usize)?;
        if let State::Compressed { copy, .. } = &mut self.state {
            if n < len as usize {
                *copy = Some((distance, len as usize - n));
            }
        }
        Ok(())
    }

    fn read_dynamic_trees(&mut self) -> Res<(PrefixDecoder, PrefixDecoder)> {
        let hlit = self.bits.read_bits(5)? as usize + 257;
        let hdist = self.bits.read_bits(5)? as usize + 1;
        let hclen = self.bits.read_bits(4)? as usize + 4;

        let mut cl_lengths = [0u8; 19];
        for i in 0..hclen {
            cl_lengths[CODE_LENGTH_ORDER[i]] = self.bits.read_bits(3)? as u8;
        }
        let cl_tree = PrefixDecoder::from_lengths(&cl_lengths)?;

        let mut lengths: Vec<u8> = Vec::with_capacity(hlit + hdist);
        while lengths.len() < hlit + hdist {
            let sym = self.bits.read_symbol(&cl_tree)?;
            match sym {
                0..=15 => lengths.push(sym as u8),
                16 => {
                    let prev = match lengths.last() {
                        Some(&l) => l,
                        None => return self.corrupted("repeat code 16 with no previous length"),
                    };
                    let count = 3 + self.bits.read_bits(2)?;
                    for _ in 0..count {
                        lengths.push(prev);
                    }
                }
                17 => {
                    let count = 3 + self.bits.read_bits(3)?;
                    for _ in 0..count {
                        lengths.push(0);
                    }
                }
                18 => {
                    let count = 11 + self.bits.read_bits(7)?;
                    for _ in 0..count {
                        lengths.push(0);
                    }
                }
                _ => return self.corrupted("invalid code-length symbol"),
            }
        }
        self.assert_eq(lengths.len(), hlit + hdist)?;

        let mut lit_lengths = lengths[..hlit].to_vec();
        let mut dist_lengths = lengths[hlit..].to_vec();
        pad_degenerate_single(&mut lit_lengths);
        pad_degenerate_single(&mut dist_lengths);

        let lit = PrefixDecoder::from_lengths(&lit_lengths)?;
        let dist = PrefixDecoder::from_lengths(&dist_lengths)?;
        Ok((lit, dist))
    }
}

/// RFC 1951 §3.2.6's one-coded-distance quirk: a tree with exactly one
/// present symbol is otherwise decoded as a zero-bit code by
/// [`PrefixDecoder`], but DEFLATE instead spends one bit on it, requiring a
/// second (unused) symbol of the same length to complete the Kraft sum.
fn pad_degenerate_single(lengths: &mut Vec<u8>) {
    let present = lengths.iter().filter(|&&l| l > 0).count();
    if present == 1 {
        let len = *lengths.iter().find(|&&l| l > 0).unwrap();
        lengths.push(len);
    }
}

fn fixed_trees() -> Res<(PrefixDecoder, PrefixDecoder)> {
    let mut lit_lengths = [0u8; 288];
    for (i, l) in lit_lengths.iter_mut().enumerate() {
        *l = match i {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    let dist_lengths = [5u8; 32];
    let lit = PrefixDecoder::from_lengths(&lit_lengths)?;
    let dist = PrefixDecoder::from_lengths(&dist_lengths)?;
    Ok((lit, dist))
}

impl<R> ErrorContext for Decoder<R> {
    fn describe(&self) -> Option<String> {
        Some(format!("deflate decoder at input offset {}", self.bits.offset()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_all(bytes: &[u8]) -> Vec<u8> {
        let mut d = Decoder::new(Cursor::new(bytes.to_vec()));
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = d.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test_log::test]
    fn stored_block_round_trips() {
        // spec §8 scenario 4: "hello, world" as a single stored block.
        let data = [
            0x00, 0x0c, 0x00, 0xf3, 0xff, b'h', b'e', b'l', b'l', b'o', b',', b' ', b'w', b'o',
            b'r', b'l', b'd', 0x03, 0x00,
        ];
        assert_eq!(decode_all(&data), b"hello, world");
    }

    #[test]
    fn one_byte_buffer_matches_large_buffer() {
        let data = [
            0x00, 0x05, 0x00, 0xfa, 0xff, b'h', b'e', b'l', b'l', b'o', 0x03, 0x00,
        ];
        let mut d = Decoder::new(Cursor::new(data.to_vec()));
        let mut out = Vec::new();
        let mut buf = [0u8; 1];
        loop {
            let n = d.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.push(buf[0]);
        }
        assert_eq!(out, b"hello");
    }

    #[test]
    fn poisoned_session_replays_error() {
        let data = [0x06u8]; // final bit=0, type=3 (reserved) -> Corrupted
        let mut d = Decoder::new(Cursor::new(data.to_vec()));
        let mut buf = [0u8; 8];
        let first = d.read(&mut buf).unwrap_err();
        let second = d.read(&mut buf).unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }
}
