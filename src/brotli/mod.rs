//! Brotli block machine (spec §4.G, RFC 7932): stream header, per-meta-block
//! prefix-code setup (block types/lengths, context modes and maps, literal/
//! insert-copy/distance trees), and the insert-copy command loop that drives
//! the shared [`SlidingDictionary`]. The teacher has no Brotli support at
//! all, so this module's control flow and tables are grounded directly in
//! `examples/simonwuelker-Stormlicht/crates/compression/src/brotli/mod.rs`,
//! re-expressed against this crate's [`LsbReader`]/[`PrefixDecoder`]/
//! [`SlidingDictionary`] primitives and its resumable `State`/`step()` idiom
//! (spec §4.J) rather than Stormlicht's one-shot `decompress(&[u8])`.

pub mod context;
pub mod static_dict;

use std::io::Read;

use crate::bitstream::LsbReader;
use crate::dictionary::SlidingDictionary;
use crate::error::{ErrorContext, Poison, Res};
use crate::prefix::PrefixDecoder;
use crate::tables::{BROTLI_BLOCK_LENGTH, BROTLI_COPY_LENGTH, BROTLI_INSERT_LENGTH, BROTLI_MAX_RLE};

/// Tracks one of the three per-meta-block block-type streams (literal,
/// insert-copy, distance): which type is active, the previous type (for
/// "reuse second-most-recent" switch code 0), and how many more items the
/// current block covers.
struct BlockTracker {
    num_types: usize,
    btype_tree: PrefixDecoder,
    blen_tree: PrefixDecoder,
    current: usize,
    prev: usize,
    remaining: usize,
}

/// A single block type effectively never switches; `decode_blockdata`
/// reports this size for that case rather than a real block length.
const NEVER_SWITCHES: usize = 16_777_216;

struct PastDistances {
    buf: [u64; 4],
}

impl PastDistances {
    fn new() -> Self {
        PastDistances {
            buf: [16, 15, 11, 4],
        }
    }

    fn peek_back(&self, n: usize) -> u64 {
        self.buf[3 - n]
    }

    fn push(&mut self, d: u64) {
        self.buf.copy_within(1..4, 0);
        self.buf[3] = d;
    }
}

struct MetaBlock {
    mlen: usize,
    bytes_done: usize,
    is_last: bool,
    npostfix: usize,
    ndirect: usize,
    context_modes: Vec<u8>,
    cmap_l: Vec<u8>,
    cmap_d: Vec<u8>,
    lit_trees: Vec<PrefixDecoder>,
    ic_trees: Vec<PrefixDecoder>,
    dist_trees: Vec<PrefixDecoder>,
    lit_tracker: BlockTracker,
    ic_tracker: BlockTracker,
    dist_tracker: BlockTracker,
}

enum CmdPhase {
    Fetch,
    Insert {
        remaining: usize,
        copy_len: usize,
        dist_zero: bool,
    },
    Distance {
        copy_len: usize,
        dist_zero: bool,
    },
    Copy {
        dist: u64,
        remaining: usize,
    },
}

enum State {
    Header,
    BlockHeader,
    Metadata { remaining: usize, is_last: bool },
    Uncompressed { remaining: usize },
    Body { meta: MetaBlock, phase: CmdPhase },
    Finished,
}

pub struct Decoder<R> {
    bits: LsbReader<R>,
    /// `None` until the stream header is parsed and the window size known.
    dict: Option<SlidingDictionary>,
    past_distances: PastDistances,
    state: State,
    poison: Poison,
    output_offset: u64,
}

impl<R: Read> Decoder<R> {
    pub fn new(source: R) -> Self {
        Decoder {
            bits: LsbReader::new(source),
            dict: None,
            past_distances: PastDistances::new(),
            state: State::Header,
            poison: Poison::default(),
            output_offset: 0,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.poison.check()?;
        let mut written = 0;
        while written < buf.len() {
            if let Some(dict) = self.dict.as_mut() {
                let chunk = dict.read_flush(buf.len() - written);
                if !chunk.is_empty() {
                    let n = chunk.len();
                    buf[written..written + n].copy_from_slice(chunk);
                    written += n;
                    continue;
                }
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

    /// Valid once the stream header has been parsed (every state after
    /// [`State::Header`]).
    fn dict(&mut self) -> &mut SlidingDictionary {
        self.dict.as_mut().unwrap()
    }

    fn step(&mut self) -> Res<()> {
        let state = std::mem::replace(&mut self.state, State::Finished);
        self.state = match state {
            State::Header => {
                self.read_stream_header()?;
                State::BlockHeader
            }
            State::BlockHeader => self.read_block_header()?,
            State::Metadata { remaining, is_last } => self.continue_metadata(remaining, is_last)?,
            State::Uncompressed { remaining } => self.continue_uncompressed(remaining)?,
            State::Body { meta, phase } => self.continue_body(meta, phase)?,
            State::Finished => State::Finished,
        };
        Ok(())
    }

    /// Sliding window size ladder (RFC 7932 §9.1): 1 bit selects the common
    /// 16-bit case; otherwise up to two more 3-bit fields widen it.
    fn read_stream_header(&mut self) -> Res<()> {
        let wbits = if self.bits.read_bits(1)? == 0 {
            16
        } else {
            let n2 = self.bits.read_bits(3)?;
            if n2 == 0 {
                let n3 = self.bits.read_bits(3)?;
                match n3 {
                    0 => 17,
                    1 => return self.corrupted("invalid window size header 1000100"),
                    _ => 8 + n3,
                }
            } else {
                17 + n2
            }
        };
        let window = (1u64 << wbits) - 16;
        self.dict = Some(SlidingDictionary::new(window as usize));
        Ok(())
    }

    fn read_block_header(&mut self) -> Res<State> {
        let is_last = self.bits.read_bits(1)? != 0;
        if is_last && self.bits.read_bits(1)? != 0 {
            log::debug!("brotli: empty last meta-block");
            return Ok(State::Finished);
        }

        let mnibbles = match self.bits.read_bits(2)? {
            0b11 => 0,
            0b00 => 4,
            0b01 => 5,
            0b10 => 6,
            _ => unreachable!("2-bit field"),
        };

        if mnibbles == 0 {
            self.assert(self.bits.read_bits(1)? == 0, "reserved metadata bit must be zero")?;
            let mskipbytes = self.bits.read_bits(2)? as u32;
            let mskiplen = if mskipbytes == 0 {
                0
            } else {
                self.bits.read_bits(mskipbytes * 8)? as usize + 1
            };
            self.bits.read_pads()?;
            return Ok(if mskiplen == 0 {
                if is_last {
                    State::Finished
                } else {
                    State::BlockHeader
                }
            } else {
                State::Metadata {
                    remaining: mskiplen,
                    is_last,
                }
            });
        }

        let mlen = self.bits.read_bits(4 * mnibbles)? as usize + 1;

        if !is_last {
            let is_uncompressed = self.bits.read_bits(1)? != 0;
            if is_uncompressed {
                self.bits.read_pads()?;
                return Ok(State::Uncompressed { remaining: mlen });
            }
        }

        self.setup_meta_block(mlen, is_last)
    }

    fn continue_metadata(&mut self, remaining: usize, is_last: bool) -> Res<State> {
        if remaining == 0 {
            return Ok(if is_last {
                State::Finished
            } else {
                State::BlockHeader
            });
        }
        let mut buf = [0u8; 4096];
        let n = remaining.min(buf.len());
        self.bits.read_bytes(&mut buf[..n])?;
        Ok(State::Metadata {
            remaining: remaining - n,
            is_last,
        })
    }

    fn continue_uncompressed(&mut self, remaining: usize) -> Res<State> {
        if remaining == 0 {
            return Ok(State::BlockHeader);
        }
        let room = self.dict().avail_size().min(remaining).max(1);
        let slice = self.dict().write_slice(room);
        let n = slice.len();
        self.bits.read_bytes(slice)?;
        self.dict().write_mark(n);
        Ok(State::Uncompressed {
            remaining: remaining - n,
        })
    }

    /// Reads the three block-type/length prefix-code setups, NPOSTFIX/
    /// NDIRECT, per-literal-block-type context modes, the literal/distance
    /// context maps, and the literal/insert-copy/distance tree arrays
    /// (RFC 7932 §9.2), in that exact order.
    fn setup_meta_block(&mut self, mlen: usize, is_last: bool) -> Res<State> {
        let lit_tracker = self.decode_blockdata()?;
        let ic_tracker = self.decode_blockdata()?;
        let dist_tracker = self.decode_blockdata()?;

        let npostfix = self.bits.read_bits(2)? as usize;
        let ndirect = (self.bits.read_bits(4)? as usize) << npostfix;

        let mut context_modes = Vec::with_capacity(lit_tracker.num_types);
        for _ in 0..lit_tracker.num_types {
            context_modes.push(self.bits.read_bits(2)? as u8);
        }

        let ntreesl = self.decode_blocknum()?;
        let cmap_l = if ntreesl >= 2 {
            self.decode_context_map(ntreesl, 64 * lit_tracker.num_types)?
        } else {
            vec![0u8; 64 * lit_tracker.num_types]
        };

        let ntreesd = self.decode_blocknum()?;
        let cmap_d = if ntreesd >= 2 {
            self.decode_context_map(ntreesd, 4 * dist_tracker.num_types)?
        } else {
            vec![0u8; 4 * dist_tracker.num_types]
        };

        let mut lit_trees = Vec::with_capacity(ntreesl);
        for _ in 0..ntreesl {
            lit_trees.push(self.read_prefix_code(256)?);
        }
        let mut ic_trees = Vec::with_capacity(ic_tracker.num_types);
        for _ in 0..ic_tracker.num_types {
            ic_trees.push(self.read_prefix_code(704)?);
        }
        let dist_alphabet = 16 + ndirect + (48 << npostfix);
        let mut dist_trees = Vec::with_capacity(ntreesd);
        for _ in 0..ntreesd {
            dist_trees.push(self.read_prefix_code(dist_alphabet)?);
        }

        let meta = MetaBlock {
            mlen,
            bytes_done: 0,
            is_last,
            npostfix,
            ndirect,
            context_modes,
            cmap_l,
            cmap_d,
            lit_trees,
            ic_trees,
            dist_trees,
            lit_tracker,
            ic_tracker,
            dist_tracker,
        };
        Ok(State::Body {
            meta,
            phase: CmdPhase::Fetch,
        })
    }

    /// Advances one unit of command-loop work: a command header, one
    /// inserted literal, the distance for a command whose copy is
    /// implicit-zero-checked, or a chunk of a back-reference/dictionary
    /// copy. Mirrors the granularity of `deflate::Decoder::continue_compressed`.
    fn continue_body(&mut self, mut meta: MetaBlock, phase: CmdPhase) -> Res<State> {
        let next_phase = match phase {
            CmdPhase::Fetch => {
                if meta.bytes_done >= meta.mlen {
                    return Ok(self.finish_or_continue(meta.is_last));
                }
                self.advance_tracker(&mut meta.ic_tracker)?;
                meta.ic_tracker.remaining = meta.ic_tracker.remaining.saturating_sub(1);
                let sym = self
                    .bits
                    .read_symbol(&meta.ic_trees[meta.ic_tracker.current])? as usize;
                let dist_zero = sym < 128;
                let (ins_code, copy_code) = decode_insert_and_copy_length_code(sym);
                let ilen = self.bits.read_offset(ins_code, &BROTLI_INSERT_LENGTH)? as usize;
                let clen = self.bits.read_offset(copy_code, &BROTLI_COPY_LENGTH)? as usize;
                CmdPhase::Insert {
                    remaining: ilen,
                    copy_len: clen,
                    dist_zero,
                }
            }
            CmdPhase::Insert {
                remaining,
                copy_len,
                dist_zero,
            } => {
                if remaining == 0 {
                    if meta.bytes_done >= meta.mlen {
                        return Ok(self.finish_or_continue(meta.is_last));
                    }
                    CmdPhase::Distance { copy_len, dist_zero }
                } else {
                    self.advance_tracker(&mut meta.lit_tracker)?;
                    meta.lit_tracker.remaining = meta.lit_tracker.remaining.saturating_sub(1);
                    let btype_l = meta.lit_tracker.current;
                    let context_mode = meta.context_modes[btype_l];
                    let (p1, p2) = self.dict().last_bytes();
                    let cid = context::literal_context_id(context_mode, p1, p2) as usize;
                    let tree_idx = meta.cmap_l[64 * btype_l + cid] as usize;
                    let sym = self.bits.read_symbol(&meta.lit_trees[tree_idx])?;
                    self.dict().write_byte(sym as u8);
                    meta.bytes_done += 1;
                    CmdPhase::Insert {
                        remaining: remaining - 1,
                        copy_len,
                        dist_zero,
                    }
                }
            }
            CmdPhase::Distance { copy_len, dist_zero } => {
                let max_distance = self.dict().hist_size();
                let distance = if dist_zero {
                    self.past_distances.peek_back(0)
                } else {
                    self.advance_tracker(&mut meta.dist_tracker)?;
                    meta.dist_tracker.remaining = meta.dist_tracker.remaining.saturating_sub(1);
                    let btype_d = meta.dist_tracker.current;
                    let cidd = context::distance_context_id(copy_len);
                    let tree_idx = meta.cmap_d[4 * btype_d + cidd] as usize;
                    let code = self.bits.read_symbol(&meta.dist_trees[tree_idx])? as usize;
                    let distance = self.substitute_distance(code, meta.npostfix, meta.ndirect)?;
                    if code != 0 && distance <= max_distance {
                        self.past_distances.push(distance);
                    }
                    distance
                };

                if distance <= max_distance {
                    CmdPhase::Copy {
                        dist: distance,
                        remaining: copy_len,
                    }
                } else {
                    let word = static_dict::lookup(copy_len, distance - max_distance - 1)?;
                    for b in &word {
                        self.dict().write_byte(*b);
                    }
                    meta.bytes_done += word.len();
                    if meta.bytes_done >= meta.mlen {
                        return Ok(self.finish_or_continue(meta.is_last));
                    }
                    CmdPhase::Fetch
                }
            }
            CmdPhase::Copy { dist, remaining } => {
                let n = self.dict().write_copy(dist, remaining)?;
                meta.bytes_done += n;
                if n < remaining {
                    CmdPhase::Copy {
                        dist,
                        remaining: remaining - n,
                    }
                } else if meta.bytes_done >= meta.mlen {
                    return Ok(self.finish_or_continue(meta.is_last));
                } else {
                    CmdPhase::Fetch
                }
            }
        };
        Ok(State::Body {
            meta,
            phase: next_phase,
        })
    }

    fn finish_or_continue(&self, is_last: bool) -> State {
        if is_last {
            State::Finished
        } else {
            State::BlockHeader
        }
    }

    /// RFC 7932 §9.2 "decCounts": a 1-bit flag for the common single-block
    /// case, else a self-describing extra-bit count.
    fn decode_blocknum(&mut self) -> Res<usize> {
        if self.bits.read_bits(1)? != 0 {
            let extra_count = self.bits.read_bits(3)? as u32;
            let extra = self.bits.read_bits(extra_count)?;
            Ok(((1u64 << extra_count) + 1 + extra) as usize)
        } else {
            Ok(1)
        }
    }

    fn decode_blockdata(&mut self) -> Res<BlockTracker> {
        let num_types = self.decode_blocknum()?;
        if num_types >= 2 {
            let btype_tree = self.read_prefix_code(num_types + 2)?;
            let blen_tree = self.read_prefix_code(BROTLI_BLOCK_LENGTH.len())?;
            let first_code = self.bits.read_symbol(&blen_tree)? as usize;
            let first_count = self.bits.read_offset(first_code, &BROTLI_BLOCK_LENGTH)? as usize;
            Ok(BlockTracker {
                num_types,
                btype_tree,
                blen_tree,
                current: 0,
                prev: 1,
                remaining: first_count,
            })
        } else {
            Ok(BlockTracker {
                num_types: 1,
                btype_tree: PrefixDecoder::empty(),
                blen_tree: PrefixDecoder::empty(),
                current: 0,
                prev: 1,
                remaining: NEVER_SWITCHES,
            })
        }
    }

    fn advance_tracker(&mut self, t: &mut BlockTracker) -> Res<()> {
        if t.remaining == 0 {
            let sym = self.bits.read_symbol(&t.btype_tree)? as usize;
            let new_type = match sym {
                0 => t.prev,
                1 => (t.current + 1) % t.num_types,
                s => s - 2,
            };
            t.prev = t.current;
            t.current = new_type;
            let len_sym = self.bits.read_symbol(&t.blen_tree)? as usize;
            t.remaining = self.bits.read_offset(len_sym, &BROTLI_BLOCK_LENGTH)? as usize;
        }
        Ok(())
    }

    /// RFC 7932 §7.3: RLE-compressed context-map values, optionally
    /// finished off with an inverse move-to-front pass.
    fn decode_context_map(&mut self, num_trees: usize, size: usize) -> Res<Vec<u8>> {
        let rle_max = if self.bits.read_bits(1)? != 0 {
            self.bits.read_bits(4)? as usize + 1
        } else {
            0
        };
        let prefix_code = self.read_prefix_code(num_trees + rle_max)?;

        let mut context_map = Vec::with_capacity(size);
        while context_map.len() < size {
            let symbol = self.bits.read_symbol(&prefix_code)? as usize;
            if symbol <= rle_max {
                let repeat_for = self.bits.read_offset(symbol, &BROTLI_MAX_RLE)? as usize;
                self.assert(
                    context_map.len() + repeat_for <= size,
                    "context map RLE run exceeds expected size",
                )?;
                context_map.resize(context_map.len() + repeat_for, 0);
            } else {
                context_map.push((symbol - rle_max) as u8);
            }
        }

        if self.bits.read_bits(1)? != 0 {
            inverse_move_to_front_transform(&mut context_map);
        }
        Ok(context_map)
    }

    fn read_prefix_code(&mut self, alphabet_size: usize) -> Res<PrefixDecoder> {
        let ident = self.bits.read_bits(2)?;
        if ident == 1 {
            self.read_simple_prefix_code(alphabet_size)
        } else {
            self.read_complex_prefix_code(alphabet_size, ident as usize)
        }
    }

    fn read_simple_prefix_code(&mut self, alphabet_size: usize) -> Res<PrefixDecoder> {
        let width = alphabet_width(alphabet_size);
        let nsym = self.bits.read_bits(2)? as usize + 1;
        let mut raw = Vec::with_capacity(nsym);
        for _ in 0..nsym {
            let s = self.bits.read_bits(width)? as usize;
            self.assert(s < alphabet_size, "simple prefix code symbol out of range")?;
            raw.push(s);
        }

        if nsym == 1 {
            return PrefixDecoder::from_codes(vec![(raw[0] as u16, 0, 0)], alphabet_size);
        }

        let assigned: Vec<u8> = match nsym {
            2 => vec![1, 1],
            3 => vec![1, 2, 2],
            4 => {
                if self.bits.read_bits(1)? != 0 {
                    vec![1, 2, 3, 3]
                } else {
                    vec![2, 2, 2, 2]
                }
            }
            _ => unreachable!("NSYM is a 2-bit field plus one"),
        };

        let mut lengths = vec![0u8; alphabet_size];
        for (sym, len) in raw.iter().zip(assigned) {
            lengths[*sym] = len;
        }
        PrefixDecoder::from_lengths(&lengths)
    }

    /// RFC 7932 §3.5: a fixed small VLC reads 18 code lengths for the
    /// code-length alphabet (itself canonically built), which is then used
    /// to read the real per-symbol lengths, with 16/17 run-length codes.
    fn read_complex_prefix_code(&mut self, alphabet_size: usize, hskip: usize) -> Res<PrefixDecoder> {
        let mut cl_lengths = [0u8; 18];
        let mut checksum: u32 = 0;
        for slot in cl_lengths.iter_mut().skip(hskip) {
            *slot = match self.bits.read_bits(2)? {
                0b00 => 0,
                0b10 => 3,
                0b01 => 4,
                0b11 => {
                    if self.bits.read_bits(1)? != 0 {
                        if self.bits.read_bits(1)? != 0 {
                            5
                        } else {
                            1
                        }
                    } else {
                        2
                    }
                }
                _ => unreachable!("2-bit field"),
            };
            if *slot != 0 {
                checksum += 32 >> *slot;
                if checksum == 32 {
                    break;
                }
            }
        }
        let nonzero = cl_lengths.iter().filter(|&&l| l != 0).count();
        self.assert(
            nonzero < 2 || checksum == 32,
            "complex prefix code-length checksum mismatch",
        )?;

        // The VLC above yields lengths in a different order than the
        // alphabet it describes; this fixed rotation (RFC 7932 §3.5)
        // restores the intended symbol order.
        cl_lengths[..5].rotate_right(1);
        cl_lengths[6..].rotate_left(1);
        cl_lengths[7..17].rotate_left(1);
        let cl_tree = PrefixDecoder::from_lengths(&cl_lengths)?;

        let mut lengths = vec![0u8; alphabet_size];
        let mut checksum: u32 = 0;
        let mut previous_nonzero: Option<u8> = None;
        let mut previous_repeat: Option<(u16, usize)> = None;
        let mut i = 0usize;
        while i < alphabet_size {
            let code = self.bits.read_symbol(&cl_tree)?;
            match code {
                0..=15 => {
                    lengths[i] = code as u8;
                    i += 1;
                    if code != 0 {
                        checksum += 32768 >> code;
                        previous_nonzero = Some(code as u8);
                        if checksum == 32768 {
                            break;
                        }
                    }
                    previous_repeat = None;
                }
                16 => {
                    let extra = self.bits.read_bits(2)? as usize;
                    let repeat_for = match previous_repeat {
                        Some((16, prev)) => {
                            let new_repeat = 4 * (prev - 2) + 3 + extra;
                            previous_repeat = Some((16, new_repeat));
                            new_repeat - prev
                        }
                        _ => {
                            let r = 3 + extra;
                            previous_repeat = Some((16, r));
                            r
                        }
                    };
                    let to_repeat = previous_nonzero.unwrap_or(8);
                    self.assert(i + repeat_for <= alphabet_size, "repeat-16 run exceeds alphabet size")?;
                    for j in 0..repeat_for {
                        lengths[i + j] = to_repeat;
                        checksum += 32768 >> to_repeat;
                    }
                    i += repeat_for;
                    if checksum == 32768 {
                        break;
                    }
                }
                17 => {
                    let extra = self.bits.read_bits(3)? as usize;
                    let repeat_for = match previous_repeat {
                        Some((17, prev)) => {
                            let new_repeat = 8 * (prev - 2) + 3 + extra;
                            previous_repeat = Some((17, new_repeat));
                            new_repeat - prev
                        }
                        _ => {
                            let r = 3 + extra;
                            previous_repeat = Some((17, r));
                            r
                        }
                    };
                    self.assert(i + repeat_for <= alphabet_size, "repeat-17 run exceeds alphabet size")?;
                    i += repeat_for;
                }
                _ => return self.corrupted("invalid code-length symbol"),
            }
        }
        self.assert_eq(checksum, 32768)?;
        self.assert(
            lengths.iter().filter(|&&l| l != 0).count() >= 2,
            "complex prefix code needs at least two nonzero lengths",
        )?;
        PrefixDecoder::from_lengths(&lengths)
    }

    /// RFC 7932 §4: codes 0-15 substitute a perturbation of the last two
    /// distances; codes >= 16 are direct or NPOSTFIX/NDIRECT-split values.
    fn substitute_distance(&mut self, code: usize, npostfix: usize, ndirect: usize) -> Res<u64> {
        let distance = match code {
            0 => self.past_distances.peek_back(0),
            1 => self.past_distances.peek_back(1),
            2 => self.past_distances.peek_back(2),
            3 => self.past_distances.peek_back(3),
            4 => self.past_distances.peek_back(0).saturating_sub(1),
            5 => self.past_distances.peek_back(0) + 1,
            6 => self.past_distances.peek_back(0).saturating_sub(2),
            7 => self.past_distances.peek_back(0) + 2,
            8 => self.past_distances.peek_back(0).saturating_sub(3),
            9 => self.past_distances.peek_back(0) + 3,
            10 => self.past_distances.peek_back(1).saturating_sub(1),
            11 => self.past_distances.peek_back(1) + 1,
            12 => self.past_distances.peek_back(1).saturating_sub(2),
            13 => self.past_distances.peek_back(1) + 2,
            14 => self.past_distances.peek_back(1).saturating_sub(3),
            15 => self.past_distances.peek_back(1) + 3,
            d if d < 16 + ndirect => (d - 15) as u64,
            d => {
                let postfix_mask = (1usize << npostfix) - 1;
                let num_extra_bits = 1 + (((d - ndirect - 16) >> (npostfix + 1)) as u32);
                let extra_bits = self.bits.read_bits(num_extra_bits)?;
                let hcode = ((d - ndirect - 16) >> npostfix) as u64;
                let lcode = ((d - ndirect - 16) & postfix_mask) as u64;
                let offset = ((2 + (hcode & 1)) << num_extra_bits) - 4;
                ((offset + extra_bits) << npostfix) + lcode + ndirect as u64 + 1
            }
        };
        Ok(distance)
    }
}

/// `ceil(log2(n))`: the fixed symbol width of a "simple" prefix code.
fn alphabet_width(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - ((n - 1) as u32).leading_zeros()
    }
}

/// RFC 7932 §5's 11-range base table for the combined insert/copy alphabet,
/// returning `(insert_length_code, copy_length_code)` indices into
/// [`BROTLI_INSERT_LENGTH`] / [`BROTLI_COPY_LENGTH`].
fn decode_insert_and_copy_length_code(code: usize) -> (usize, usize) {
    let (insert_base, copy_base) = match code {
        0..=63 => (0, 0),
        64..=127 => (0, 8),
        128..=191 => (0, 0),
        192..=255 => (0, 8),
        256..=319 => (8, 0),
        320..=383 => (8, 8),
        384..=447 => (0, 16),
        448..=511 => (16, 0),
        512..=575 => (8, 16),
        576..=639 => (16, 8),
        640..=703 => (16, 16),
        _ => unreachable!("insert-copy alphabet has 704 symbols"),
    };
    let insert_extra = (code >> 3) & 0b111;
    let copy_extra = code & 0b111;
    (insert_base + insert_extra, copy_base + copy_extra)
}

/// Classic inverse move-to-front over already-materialized byte values
/// (distinct from [`crate::mtf`]'s bijective zero-run scheme used by
/// BZip2's MTF/RLE2 stage), applied to a context map's decoded values.
fn inverse_move_to_front_transform(data: &mut [u8]) {
    let mut mtf: [u8; 256] = std::array::from_fn(|i| i as u8);
    for d in data.iter_mut() {
        let index = *d as usize;
        let value = mtf[index];
        *d = value;
        for j in (1..=index).rev() {
            mtf[j] = mtf[j - 1];
        }
        mtf[0] = value;
    }
}

impl<R> ErrorContext for Decoder<R> {
    fn describe(&self) -> Option<String> {
        Some("brotli decoder".into())
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
    fn empty_last_block_decodes_to_nothing() {
        // wbits flag=0, ISLAST=1, ISLASTEMPTY=1: bits 0,1,1 -> byte 0x06.
        assert_eq!(decode_all(&[0x06]), Vec::<u8>::new());
    }

    #[test]
    fn nonstandard_window_size_ladder_is_self_consistent() {
        // wbits flag=1, n2=3 (wbits=20), ISLAST=1, ISLASTEMPTY=1 -> 0x37.
        assert_eq!(decode_all(&[0x37]), Vec::<u8>::new());
    }

    #[test]
    fn alphabet_width_matches_ceil_log2() {
        assert_eq!(alphabet_width(1), 0);
        assert_eq!(alphabet_width(2), 1);
        assert_eq!(alphabet_width(256), 8);
        assert_eq!(alphabet_width(704), 10);
    }

    #[test]
    fn insert_copy_length_code_splits_base_and_extra() {
        assert_eq!(decode_insert_and_copy_length_code(0), (0, 0));
        assert_eq!(decode_insert_and_copy_length_code(6), (0, 6));
        assert_eq!(decode_insert_and_copy_length_code(128), (0, 0));
        assert_eq!(decode_insert_and_copy_length_code(640), (16, 16));
    }

    #[test]
    fn inverse_mtf_promotes_repeated_index_to_front() {
        let mut data = [2u8, 0, 0];
        inverse_move_to_front_transform(&mut data);
        assert_eq!(data, [2, 2, 2]);
    }

    #[test]
    fn past_distances_push_shifts_and_overwrites_back() {
        let mut pd = PastDistances::new();
        assert_eq!(pd.peek_back(0), 4);
        assert_eq!(pd.peek_back(3), 16);
        pd.push(7);
        assert_eq!(pd.peek_back(0), 7);
        assert_eq!(pd.peek_back(1), 4);
        assert_eq!(pd.peek_back(3), 15);
    }
}
