//! Canonical prefix (Huffman) code construction and two-level table decode
//! (spec §4.B).

use crate::error::{ErrorContext, Res, ResultBuilder, StreamErrorKind};

const MAX_CHUNK_BITS: u32 = 9;

/// One entry of the first-level (`chunks`) or second-level (`links`) table.
/// If `len <= chunk_bits` (first level only), `value` is the decoded symbol;
/// otherwise `value` is an index into `links` and `len` is the link's width
/// marker `chunk_bits + 1`, per spec §4.B.
#[derive(Clone, Copy, Default)]
struct Entry {
    value: u16,
    len: u8,
}

/// An immutable two-level lookup table over a complete (or permitted
/// degenerate) prefix code, built once per distinct alphabet in a stream.
pub struct PrefixDecoder {
    chunk_bits: u32,
    chunks: Vec<Entry>,
    links: Vec<Vec<Entry>>,
    pub min_bits: u32,
    pub max_bits: u32,
    pub num_syms: usize,
}

impl ErrorContext for PrefixDecoder {
    fn describe(&self) -> Option<String> {
        Some(format!(
            "prefix decoder: {} symbols, {}..{} bits",
            self.num_syms, self.min_bits, self.max_bits
        ))
    }
}

/// `code` occupies the top `len` bits of a `max_bits`-wide value; this
/// returns the bit-reversed low `chunk_bits` that index the flat table,
/// per spec §4.B ("low L bits, in reversed bit order").
fn reverse_bits(mut code: u32, len: u32) -> u32 {
    let mut out = 0u32;
    for _ in 0..len {
        out = (out << 1) | (code & 1);
        code >>= 1;
    }
    out
}

impl PrefixDecoder {
    /// An always-empty decoder: legal to hold, a programmer error to consult
    /// (spec §4.B "an empty tree is allowed and will panic only if consulted").
    pub fn empty() -> Self {
        PrefixDecoder {
            chunk_bits: 0,
            chunks: vec![Entry::default(); 1],
            links: Vec::new(),
            min_bits: 0,
            max_bits: 0,
            num_syms: 0,
        }
    }

    /// Builds a canonical code from code lengths, sorted by ascending symbol.
    /// A length of 0 means "symbol not present". Rejects incomplete or
    /// over-subscribed trees except for the two documented degenerate cases.
    pub fn from_lengths(lengths: &[u8]) -> Res<Self> {
        let num_syms = lengths.len();
        let max_bits = lengths.iter().copied().max().unwrap_or(0) as u32;
        if max_bits == 0 {
            return Ok(Self::empty());
        }

        let present: Vec<(u16, u8)> = lengths
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l > 0)
            .map(|(sym, &l)| (sym as u16, l))
            .collect();

        let min_bits = present.iter().map(|&(_, l)| l).min().unwrap_or(0) as u32;

        // Kraft-sum completeness check, expressed without floating point:
        // sum of 2^(max_bits - len) must equal 2^max_bits.
        let mut kraft: u64 = 0;
        for &(_, len) in &present {
            kraft += 1u64 << (max_bits - len as u32);
        }
        if kraft != 1u64 << max_bits {
            return PrefixDecoder::empty().corrupted(format!(
                "incomplete or over-subscribed code: kraft sum {} != {}",
                kraft,
                1u64 << max_bits
            ));
        }

        // Canonical code assignment: ascending length, then ascending symbol.
        let mut by_len = present.clone();
        by_len.sort_by_key(|&(sym, len)| (len, sym));
        let mut code: u32 = 0;
        let mut last_len = by_len.first().map(|&(_, l)| l).unwrap_or(0);
        let mut entries = Vec::with_capacity(by_len.len());
        for (sym, len) in by_len {
            code <<= len as u32 - last_len as u32;
            entries.push((sym, code, len));
            code += 1;
            last_len = len;
        }

        Self::from_table(entries, num_syms, min_bits, max_bits)
    }

    /// Builds a decoder from already-assigned `(symbol, code, len)` triples;
    /// verifies no two codes share a prefix.
    pub fn from_codes(entries: Vec<(u16, u32, u8)>, num_syms: usize) -> Res<Self> {
        if entries.is_empty() {
            return Ok(Self::empty());
        }
        let max_bits = entries.iter().map(|&(_, _, l)| l).max().unwrap() as u32;
        let min_bits = entries.iter().map(|&(_, _, l)| l).min().unwrap() as u32;

        for i in 0..entries.len() {
            for j in i + 1..entries.len() {
                let (_, ci, li) = entries[i];
                let (_, cj, lj) = entries[j];
                let shorter = li.min(lj) as u32;
                if shorter == 0 {
                    continue;
                }
                if (ci >> (li as u32 - shorter)) == (cj >> (lj as u32 - shorter)) {
                    return Self::empty()
                        .corrupted("overlapping prefix codes in explicit code list");
                }
            }
        }

        Self::from_table(entries, num_syms, min_bits, max_bits)
    }

    fn from_table(
        entries: Vec<(u16, u32, u8)>,
        num_syms: usize,
        min_bits: u32,
        max_bits: u32,
    ) -> Res<Self> {
        let chunk_bits = max_bits.min(MAX_CHUNK_BITS);
        let mut chunks = vec![Entry::default(); 1 << chunk_bits];
        let mut links: Vec<Vec<Entry>> = Vec::new();

        let link_width_marker = (chunk_bits + 1) as u8;
        for (sym, code, len) in entries {
            let len = len as u32;
            if len <= chunk_bits {
                let stride = 1u32 << len;
                let base = reverse_bits(code, len);
                let mut idx = base;
                while idx < (1 << chunk_bits) {
                    chunks[idx as usize] = Entry {
                        value: sym,
                        len: len as u8,
                    };
                    idx += stride;
                }
            } else {
                // The link table's width is fixed at `max_bits - chunk_bits`
                // for every code sharing this chunk prefix, not this code's
                // own remaining-bit count; shorter-than-max codes duplicate
                // across it the same way short codes duplicate in `chunks`.
                let full_link_bits = max_bits - chunk_bits;
                let code_link_bits = len - chunk_bits;
                let low = code >> code_link_bits;
                let low_rev = reverse_bits(low, chunk_bits) as usize;

                let link_idx = if chunks[low_rev].len == link_width_marker {
                    chunks[low_rev].value as usize
                } else {
                    links.push(vec![Entry::default(); 1 << full_link_bits]);
                    let idx = links.len() - 1;
                    chunks[low_rev] = Entry {
                        value: idx as u16,
                        len: link_width_marker,
                    };
                    idx
                };

                let high = code & ((1 << code_link_bits) - 1);
                let high_rev = reverse_bits(high, code_link_bits);
                let stride = 1u32 << code_link_bits;
                let mut idx = high_rev;
                while idx < (1 << full_link_bits) {
                    links[link_idx][idx as usize] = Entry {
                        value: sym,
                        len: len as u8,
                    };
                    idx += stride;
                }
            }
        }

        Ok(PrefixDecoder {
            chunk_bits,
            chunks,
            links,
            min_bits,
            max_bits,
            num_syms,
        })
    }

    /// Decodes one symbol given the low bits of the pending stream (LSB-first
    /// view), returning `(symbol, code length in bits)`. `peek` must supply
    /// at least `max_bits` valid bits (zero-padded at EOF is the caller's
    /// problem, not this function's).
    pub(crate) fn decode(&self, peek: u64) -> Res<(u16, u32)> {
        if self.chunks.len() == 1 && self.links.is_empty() && self.chunk_bits == 0 {
            if self.num_syms == 0 {
                return self.raise(StreamErrorKind::Internal, "empty prefix decoder consulted".into());
            }
            return Ok((self.chunks[0].value, 0));
        }
        let idx = (peek & ((1u64 << self.chunk_bits) - 1)) as usize;
        let entry = self.chunks[idx];
        if (entry.len as u32) <= self.chunk_bits {
            Ok((entry.value, entry.len as u32))
        } else {
            let link_bits = self.max_bits - self.chunk_bits;
            let link_idx = ((peek >> self.chunk_bits) & ((1u64 << link_bits) - 1)) as usize;
            let link_entry = self.links[entry.value as usize][link_idx];
            Ok((link_entry.value, link_entry.len as u32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_symbol_tree_consumes_no_bits() {
        let d = PrefixDecoder::from_lengths(&[0, 0]).unwrap();
        // Kraft sum of an all-zero-length vector is zero syms present: empty.
        assert_eq!(d.num_syms, 0);
    }

    #[test]
    fn rfc1951_fixed_like_code_round_trips() {
        // lengths 2,2,2,2 -> complete 2-bit code for 4 symbols.
        let d = PrefixDecoder::from_lengths(&[2, 2, 2, 2]).unwrap();
        let mut seen = std::collections::HashSet::new();
        for bits in 0u64..4 {
            let (sym, len) = d.decode(bits).unwrap();
            assert_eq!(len, 2);
            seen.insert(sym);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn rejects_incomplete_code() {
        // lengths 1,3 -> kraft sum = 1/2 + 1/8 != 1.
        assert!(PrefixDecoder::from_lengths(&[1, 3]).is_err());
    }

    #[test]
    fn long_codes_use_link_table() {
        // ten symbols of length 10 forces chunk_bits=9 and a link table.
        let lengths = vec![10u8; 1024];
        let d = PrefixDecoder::from_lengths(&lengths).unwrap();
        assert!(!d.links.is_empty());
        let (_, len) = d.decode(0).unwrap();
        assert_eq!(len, 10);
    }
}
