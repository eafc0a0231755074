//! BZip2 block machine (spec §4.I): stream framing, selector/Huffman-table
//! parsing, MTF/RUNA-RUNB symbol decode, inverse BWT, RLE1 expansion, and
//! cross-block CRC combination. The whole format is MSB-first, including
//! its fixed-width integer fields, so every multi-bit field here is
//! re-assembled big-endian from the bit reader's own LSB-first convention
//! (§4.A) via [`Decoder::read_be`] — only Huffman-coded symbols skip that
//! step, since [`PrefixDecoder`] already normalizes bit order internally.

use std::io::Read;

use crate::bitstream::MsbReader;
use crate::crc32::{combine_stream_crc, Crc32Unreflected};
use crate::error::{ErrorContext, Poison, Res, StreamErrorKind};
use crate::mtf;
use crate::prefix::PrefixDecoder;

const BLOCK_MAGIC: u64 = 0x314159265359;
const END_MAGIC: u64 = 0x177245385090;
const GROUP_SIZE: usize = 50;

enum State {
    StreamHeader,
    BlockStart,
    Finished,
}

pub struct Decoder<R> {
    bits: MsbReader<R>,
    level: u32,
    stream_crc: u32,
    state: State,
    pending: Vec<u8>,
    pending_pos: usize,
    poison: Poison,
    output_offset: u64,
}

impl<R: Read> Decoder<R> {
    pub fn new(source: R) -> Self {
        Decoder {
            bits: MsbReader::new(source),
            level: 0,
            stream_crc: 0,
            state: State::StreamHeader,
            pending: Vec::new(),
            pending_pos: 0,
            poison: Poison::default(),
            output_offset: 0,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.poison.check()?;
        let mut written = 0;
        while written < buf.len() {
            if self.pending_pos < self.pending.len() {
                let n = (self.pending.len() - self.pending_pos).min(buf.len() - written);
                buf[written..written + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
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

    /// Reassembles an `n`-bit (`n <= 57`) big-endian field: BZip2's own
    /// convention, where the first bit consumed is the most significant.
    fn read_be(&mut self, n: u32) -> Res<u64> {
        let v = self.bits.read_bits(n)?;
        let mut out = 0u64;
        let mut v = v;
        for _ in 0..n {
            out = (out << 1) | (v & 1);
            v >>= 1;
        }
        Ok(out)
    }

    fn step(&mut self) -> Res<()> {
        match self.state {
            State::StreamHeader => self.read_stream_header(),
            State::BlockStart => self.read_block(),
            State::Finished => Ok(()),
        }
    }

    fn read_stream_header(&mut self) -> Res<()> {
        let magic = self.read_be(16)?;
        self.assert_eq(magic, 0x425A)?;
        let version = self.read_be(8)?;
        if version != u64::from(b'h') {
            return self.raise(StreamErrorKind::Deprecated, "bzip1 stream (missing 'h' version byte)".into());
        }
        let level = self.read_be(8)?;
        self.assert(
            (b'1' as u64..=b'9' as u64).contains(&level),
            "block-size level out of range",
        )?;
        self.level = level as u32 - b'0' as u32;
        self.state = State::BlockStart;
        Ok(())
    }

    fn read_block(&mut self) -> Res<()> {
        let magic = self.read_be(48)?;
        if magic == END_MAGIC {
            let stored = self.read_be(32)? as u32;
            self.assert_eq(stored, self.stream_crc)?;
            log::debug!("bzip2: end-of-stream, combined crc {stored:#010x}");
            self.state = State::Finished;
            return Ok(());
        }
        self.assert_eq(magic, BLOCK_MAGIC)?;

        let stored_crc = self.read_be(32)? as u32;
        let randomized = self.read_be(1)? != 0;
        if randomized {
            return self.raise(StreamErrorKind::Deprecated, "randomized blocks are not supported".into());
        }
        let origin_ptr = self.read_be(24)? as usize;

        let present = self.read_symbol_map()?;
        let num_syms = present.len() + 2;
        self.assert(num_syms >= 3, "symbol map selects fewer than one byte value")?;

        let num_trees = self.read_be(3)? as usize;
        self.assert(
            (2..=6).contains(&num_trees),
            "number of Huffman tables out of range",
        )?;
        let num_sels = self.read_be(15)? as usize;

        let selectors = self.read_selectors(num_trees, num_sels)?;
        let trees = self.read_tables(num_trees, num_syms)?;

        let limit = self.level as usize * 100_000;
        let symbols = self.decode_symbols(&selectors, &trees, num_syms, limit)?;

        let mtf_out = mtf::decode(&symbols, present);
        self.assert(origin_ptr < mtf_out.len().max(1), "BWT origin pointer out of range")?;
        let original = inverse_bwt(&mtf_out, origin_ptr);
        let decoded = rle1_decode(&original);

        let mut crc = Crc32Unreflected::default();
        crc.write(&decoded);
        let block_crc = crc.finish();
        self.assert_eq(block_crc, stored_crc)?;
        self.stream_crc = combine_stream_crc(self.stream_crc, block_crc);
        log::trace!(
            "bzip2: decoded block ({num_trees} trees, {num_sels} selectors) to {} bytes",
            decoded.len()
        );

        self.pending = decoded;
        self.pending_pos = 0;
        Ok(())
    }

    fn read_symbol_map(&mut self) -> Res<Vec<u8>> {
        let high = self.read_be(16)?;
        let mut present = Vec::new();
        for i in 0..16u32 {
            if (high >> (15 - i)) & 1 == 0 {
                continue;
            }
            let low = self.read_be(16)?;
            for j in 0..16u32 {
                if (low >> (15 - j)) & 1 != 0 {
                    present.push((i * 16 + j) as u8);
                }
            }
        }
        Ok(present)
    }

    fn read_selectors(&mut self, num_trees: usize, num_sels: usize) -> Res<Vec<u8>> {
        let mut mtf_state: Vec<u8> = (0..num_trees as u8).collect();
        let mut selectors = Vec::with_capacity(num_sels);
        for _ in 0..num_sels {
            let mut j = 0usize;
            while self.bits.read_bits(1)? == 1 {
                j += 1;
                self.assert(j < num_trees, "selector unary code out of range")?;
            }
            let value = mtf_state.remove(j);
            mtf_state.insert(0, value);
            selectors.push(value);
        }
        Ok(selectors)
    }

    fn read_tables(&mut self, num_trees: usize, num_syms: usize) -> Res<Vec<PrefixDecoder>> {
        let mut trees = Vec::with_capacity(num_trees);
        for _ in 0..num_trees {
            let mut curr = self.read_be(5)? as i32;
            let mut lengths = Vec::with_capacity(num_syms);
            for _ in 0..num_syms {
                loop {
                    self.assert((1..=20).contains(&curr), "Huffman code length out of range")?;
                    if self.bits.read_bits(1)? == 0 {
                        break;
                    }
                    if self.bits.read_bits(1)? == 0 {
                        curr += 1;
                    } else {
                        curr -= 1;
                    }
                }
                lengths.push(curr as u8);
            }
            trees.push(PrefixDecoder::from_lengths(&lengths)?);
        }
        Ok(trees)
    }

    fn decode_symbols(
        &mut self,
        selectors: &[u8],
        trees: &[PrefixDecoder],
        num_syms: usize,
        limit: usize,
    ) -> Res<Vec<u32>> {
        let eof_sym = num_syms as u16 - 1;
        let mut symbols = Vec::new();
        let mut group = 0usize;
        let mut in_group = 0usize;
        loop {
            if in_group == 0 {
                self.assert(group < selectors.len(), "ran out of selectors before EOF symbol")?;
            }
            let tree = &trees[selectors[group] as usize];
            let sym = self.bits.read_symbol(tree)?;
            if sym == eof_sym {
                break;
            }
            symbols.push(sym as u32);
            self.assert(symbols.len() <= limit, "block symbol count exceeds block-size limit")?;
            in_group += 1;
            if in_group == GROUP_SIZE {
                in_group = 0;
                group += 1;
            }
        }
        Ok(symbols)
    }
}

/// Classic tt[]-pointer inverse BWT (spec §4.I step 9): counting-sort the
/// byte histogram into exclusive prefix sums, scatter each position's
/// "next" pointer, then walk the cycle starting at `ptr`.
fn inverse_bwt(buf: &[u8], ptr: usize) -> Vec<u8> {
    let n = buf.len();
    if n == 0 {
        return Vec::new();
    }
    let mut counts = [0u32; 256];
    for &b in buf {
        counts[b as usize] += 1;
    }
    let mut base = [0u32; 256];
    let mut sum = 0u32;
    for i in 0..256 {
        base[i] = sum;
        sum += counts[i];
    }
    let mut next_free = base;
    let mut tt = vec![0u32; n];
    for (i, &b) in buf.iter().enumerate() {
        tt[next_free[b as usize] as usize] = i as u32;
        next_free[b as usize] += 1;
    }
    let mut out = Vec::with_capacity(n);
    let mut t_pos = tt[ptr];
    for _ in 0..n {
        out.push(buf[t_pos as usize]);
        t_pos = tt[t_pos as usize];
    }
    out
}

/// RLE1 expansion (spec §4.I step 10): four equal bytes in a row are
/// followed by one extra count byte giving how many more copies to emit.
fn rle1_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        let mut run = 1;
        while run < 4 && i + run < data.len() && data[i + run] == b {
            run += 1;
        }
        for _ in 0..run {
            out.push(b);
        }
        i += run;
        if run == 4 && i < data.len() {
            let k = data[i] as usize;
            for _ in 0..k {
                out.push(b);
            }
            i += 1;
        }
    }
    out
}

impl<R> ErrorContext for Decoder<R> {
    fn describe(&self) -> Option<String> {
        Some(format!("bzip2 decoder, level {}", self.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn rle1_expands_four_byte_runs() {
        let data = [b'a', b'a', b'a', b'a', 2, b'b'];
        assert_eq!(rle1_decode(&data), vec![b'a'; 6].into_iter().chain([b'b']).collect::<Vec<_>>());
    }

    #[test]
    fn rle1_passes_short_runs_through() {
        let data = [b'a', b'a', b'b', b'c'];
        assert_eq!(rle1_decode(&data), data.to_vec());
    }

    #[test]
    fn inverse_bwt_recovers_banana_like_example() {
        // spec §8 scenario 5, byte-for-byte.
        let forward = b"TEXYDST.E.IXIXIXXSSMPPS.B..E.S.EUSFXDIIOIIIT";
        let original = b"SIX.MIXED.PIXIES.SIFT.SIXTY.PIXIE.DUST.BOXES";
        assert_eq!(inverse_bwt(forward, 29), original.to_vec());
    }
}
