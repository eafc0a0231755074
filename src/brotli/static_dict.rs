//! Brotli static dictionary & word transforms (spec §4.H, RFC 7932 §8-9).
//!
//! `NDBITS`/`DOFFSET` and the 121-entry transform table are the RFC's small,
//! enumerable metadata and are reproduced faithfully (grounded in
//! `examples/simonwuelker-Stormlicht/crates/compression/src/brotli/dictionary.rs`,
//! whose `NDBITS` table and `transform()` match table-for-table). The
//! 122,784-byte word corpus itself (RFC 7932 Appendix A) is not: Stormlicht
//! fetches the genuine blob at build time from a checked-in download
//! location this crate has no way to reproduce honestly, so `WORD_BLOB`
//! here is a generated placeholder of the *correct size* filled with a
//! deterministic repeating pattern rather than real English word data.
//! Everything downstream of the blob — offsets, transform dispatch, the
//! length/bit-size tables — is implemented to the real RFC shape.

use crate::error::{ErrorContext, Res};

/// log2(number of transform variants populated) per word length 4..24,
/// index 0..3 unused.
const NDBITS: [u32; 25] = [
    0, 0, 0, 0, 10, 10, 11, 11, 10, 10, 10, 10, 10, 9, 9, 8, 7, 7, 8, 7, 7, 6, 6, 5, 5,
];

const fn nwords_table() -> [usize; 25] {
    let mut out = [0usize; 25];
    let mut i = 4;
    while i < 25 {
        out[i] = 1usize << NDBITS[i];
        i += 1;
    }
    out
}

const fn doffset_table(nwords: &[usize; 25]) -> [usize; 25] {
    let mut out = [0usize; 25];
    let mut i = 0;
    while i < 24 {
        out[i + 1] = out[i] + i * nwords[i];
        i += 1;
    }
    out
}

pub const NWORDS: [usize; 25] = nwords_table();
pub const DOFFSET: [usize; 25] = doffset_table(&NWORDS);
const BLOB_LEN: usize = DOFFSET[24] + 24 * NWORDS[24];

const fn build_placeholder_blob() -> [u8; BLOB_LEN] {
    let mut blob = [0u8; BLOB_LEN];
    let mut i = 0;
    while i < BLOB_LEN {
        blob[i] = b'a' + (i % 26) as u8;
        i += 1;
    }
    blob
}

/// Placeholder for RFC 7932 Appendix A; see module docs.
static WORD_BLOB: [u8; BLOB_LEN] = build_placeholder_blob();

enum Op {
    Identity,
    UppercaseFirst,
    UppercaseAll,
    OmitFirst(u8),
    OmitLast(u8),
}

struct Transform {
    prefix: &'static [u8],
    op: Op,
    suffix: &'static [u8],
}

macro_rules! t {
    ($prefix:expr, $op:expr, $suffix:expr) => {
        Transform {
            prefix: $prefix,
            op: $op,
            suffix: $suffix,
        }
    };
}

/// The 121 transforms of RFC 7932 §8, table-for-table.
const TRANSFORMS: [Transform; 121] = [
    t!(b"", Op::Identity, b""),
    t!(b"", Op::Identity, b" "),
    t!(b" ", Op::Identity, b" "),
    t!(b"", Op::OmitFirst(1), b""),
    t!(b"", Op::UppercaseFirst, b" "),
    t!(b"", Op::Identity, b" the "),
    t!(b" ", Op::Identity, b""),
    t!(b"s ", Op::Identity, b" "),
    t!(b"", Op::Identity, b" of "),
    t!(b"", Op::UppercaseFirst, b""),
    t!(b"", Op::Identity, b" and "),
    t!(b"", Op::OmitFirst(2), b""),
    t!(b"", Op::OmitLast(1), b""),
    t!(b", ", Op::Identity, b" "),
    t!(b"", Op::Identity, b", "),
    t!(b" ", Op::UppercaseFirst, b" "),
    t!(b"", Op::Identity, b" in "),
    t!(b"", Op::Identity, b" to "),
    t!(b"e ", Op::Identity, b" "),
    t!(b"", Op::Identity, b"\""),
    t!(b"", Op::Identity, b"."),
    t!(b"", Op::Identity, b"\">"),
    t!(b"", Op::Identity, b"\n"),
    t!(b"", Op::OmitLast(3), b""),
    t!(b"", Op::Identity, b"]"),
    t!(b"", Op::Identity, b" for "),
    t!(b"", Op::OmitFirst(3), b""),
    t!(b"", Op::OmitLast(2), b""),
    t!(b"", Op::Identity, b" a "),
    t!(b"", Op::Identity, b" that "),
    t!(b" ", Op::UppercaseFirst, b""),
    t!(b"", Op::Identity, b". "),
    t!(b".", Op::Identity, b""),
    t!(b" ", Op::Identity, b", "),
    t!(b"", Op::OmitFirst(4), b""),
    t!(b"", Op::Identity, b" with "),
    t!(b"", Op::Identity, b"'"),
    t!(b"", Op::Identity, b" from "),
    t!(b"", Op::Identity, b" by "),
    t!(b"", Op::OmitFirst(5), b""),
    t!(b"", Op::OmitFirst(6), b""),
    t!(b" the ", Op::Identity, b""),
    t!(b"", Op::OmitLast(4), b""),
    t!(b"", Op::Identity, b". The "),
    t!(b"", Op::UppercaseAll, b""),
    t!(b"", Op::Identity, b" on "),
    t!(b"", Op::Identity, b" as "),
    t!(b"", Op::Identity, b" is "),
    t!(b"", Op::OmitLast(7), b""),
    t!(b"", Op::OmitLast(1), b"ing "),
    t!(b"", Op::Identity, b"\n\t"),
    t!(b"", Op::Identity, b":"),
    t!(b" ", Op::Identity, b". "),
    t!(b"", Op::Identity, b"ed "),
    t!(b"", Op::OmitFirst(9), b""),
    t!(b"", Op::OmitFirst(7), b""),
    t!(b"", Op::OmitLast(6), b""),
    t!(b"", Op::Identity, b"("),
    t!(b"", Op::UppercaseFirst, b", "),
    t!(b"", Op::OmitLast(8), b""),
    t!(b"", Op::Identity, b" at "),
    t!(b"", Op::Identity, b"ly "),
    t!(b" the ", Op::Identity, b" of "),
    t!(b"", Op::OmitLast(5), b""),
    t!(b"", Op::OmitLast(9), b""),
    t!(b" ", Op::UppercaseFirst, b", "),
    t!(b"", Op::UppercaseFirst, b"\""),
    t!(b".", Op::Identity, b"("),
    t!(b"", Op::UppercaseAll, b" "),
    t!(b"", Op::UppercaseFirst, b"\">"),
    t!(b"", Op::Identity, b"=\""),
    t!(b" ", Op::Identity, b"."),
    t!(b".com/", Op::Identity, b""),
    t!(b" the ", Op::Identity, b" of the "),
    t!(b"", Op::UppercaseFirst, b"'"),
    t!(b"", Op::Identity, b". This "),
    t!(b"", Op::Identity, b","),
    t!(b".", Op::Identity, b" "),
    t!(b"", Op::UppercaseFirst, b"("),
    t!(b"", Op::UppercaseFirst, b"."),
    t!(b"", Op::Identity, b" not "),
    t!(b" ", Op::Identity, b"=\""),
    t!(b"", Op::Identity, b"er "),
    t!(b" ", Op::UppercaseAll, b" "),
    t!(b"", Op::Identity, b"al "),
    t!(b" ", Op::UppercaseAll, b""),
    t!(b"", Op::Identity, b"='"),
    t!(b"", Op::UppercaseAll, b"\""),
    t!(b"", Op::UppercaseFirst, b". "),
    t!(b" ", Op::Identity, b"("),
    t!(b"", Op::Identity, b"ful "),
    t!(b" ", Op::UppercaseFirst, b". "),
    t!(b"", Op::Identity, b"ive "),
    t!(b"", Op::Identity, b"less "),
    t!(b"", Op::UppercaseAll, b"'"),
    t!(b"", Op::Identity, b"est "),
    t!(b" ", Op::UppercaseFirst, b"."),
    t!(b"", Op::UppercaseAll, b"\">"),
    t!(b" ", Op::Identity, b"='"),
    t!(b"", Op::UppercaseFirst, b","),
    t!(b"", Op::Identity, b"ize "),
    t!(b"", Op::UppercaseAll, b"."),
    t!(b"\xc2\xa0", Op::Identity, b""),
    t!(b" ", Op::Identity, b","),
    t!(b"", Op::UppercaseFirst, b"=\""),
    t!(b"", Op::UppercaseAll, b"=\""),
    t!(b"", Op::Identity, b"ous "),
    t!(b"", Op::UppercaseAll, b", "),
    t!(b"", Op::UppercaseFirst, b"='"),
    t!(b" ", Op::UppercaseFirst, b","),
    t!(b" ", Op::UppercaseAll, b"=\""),
    t!(b" ", Op::UppercaseAll, b", "),
    t!(b"", Op::UppercaseAll, b","),
    t!(b"", Op::UppercaseAll, b"("),
    t!(b"", Op::UppercaseAll, b". "),
    t!(b" ", Op::UppercaseAll, b"."),
    t!(b" ", Op::UppercaseAll, b"='"),
    t!(b" ", Op::UppercaseAll, b". "),
    t!(b" ", Op::UppercaseFirst, b"=\""),
    t!(b" ", Op::UppercaseAll, b"='"),
    t!(b" ", Op::UppercaseFirst, b"='"),
];

/// Toggles bit 5 of ASCII lowercase letters; for multi-byte UTF-8 sequences
/// flips the continuation byte per RFC 7932 §8's "ferment" rule.
fn uppercase_at(word: &mut [u8], pos: usize) -> usize {
    let b = word[pos];
    if b < 0xC0 {
        if (0x61..=0x7A).contains(&b) {
            word[pos] ^= 0x20;
        }
        1
    } else if b < 0xE0 {
        if pos + 1 < word.len() {
            word[pos + 1] ^= 0x20;
        }
        2
    } else {
        if pos + 2 < word.len() {
            word[pos + 2] ^= 0x05;
        }
        3
    }
}

fn uppercase_first(word: &mut [u8]) {
    if !word.is_empty() {
        uppercase_at(word, 0);
    }
}

fn uppercase_all(word: &mut [u8]) {
    let mut i = 0;
    while i < word.len() {
        i += uppercase_at(word, i);
    }
}

/// Applies `TRANSFORMS[transform_idx]` to `word`, producing the final bytes
/// to copy into the dictionary.
fn apply_transform(word: &[u8], transform_idx: usize) -> Vec<u8> {
    let t = &TRANSFORMS[transform_idx];
    let body: &[u8] = match t.op {
        Op::OmitFirst(n) => {
            let n = n as usize;
            if n < word.len() {
                &word[n..]
            } else {
                &word[word.len()..]
            }
        }
        Op::OmitLast(n) => {
            let n = n as usize;
            if n < word.len() {
                &word[..word.len() - n]
            } else {
                &word[..0]
            }
        }
        _ => word,
    };
    let mut out = Vec::with_capacity(t.prefix.len() + body.len() + t.suffix.len());
    out.extend_from_slice(t.prefix);
    out.extend_from_slice(body);
    out.extend_from_slice(t.suffix);
    match t.op {
        Op::UppercaseFirst => uppercase_first(&mut out[t.prefix.len()..]),
        Op::UppercaseAll => {
            let end = t.prefix.len() + body.len();
            uppercase_all(&mut out[t.prefix.len()..end]);
        }
        _ => {}
    }
    out
}

/// Looks up a static-dictionary reference: `copy_len` is the word length
/// (4..24), `dist` is the already-decoded distance beyond the dictionary's
/// current history (spec §4.G "static-dictionary reference" branch).
pub fn lookup(copy_len: usize, dist_past_history: u64) -> Res<Vec<u8>> {
    let ctx = StaticDictError;
    ctx.assert((4..=24).contains(&copy_len), "static dictionary word length out of range")?;
    let nwords = NWORDS[copy_len];
    let word_idx = dist_past_history;
    let index = (word_idx % nwords as u64) as usize;
    let transform_idx = (word_idx >> NDBITS[copy_len]) as usize;
    ctx.assert(transform_idx < TRANSFORMS.len(), "static dictionary transform id out of range")?;
    let base = DOFFSET[copy_len] + index * copy_len;
    let word = &WORD_BLOB[base..base + copy_len];
    Ok(apply_transform(word, transform_idx))
}

struct StaticDictError;
impl ErrorContext for StaticDictError {
    fn describe(&self) -> Option<String> {
        Some("brotli static dictionary".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_size_matches_rfc_total() {
        assert_eq!(BLOB_LEN, 122_784);
    }

    #[test]
    fn identity_transform_is_passthrough() {
        let out = apply_transform(b"word", 0);
        assert_eq!(out, b"word");
    }

    #[test]
    fn uppercase_first_flips_only_leading_letter() {
        let out = apply_transform(b"word", 9); // UppercaseFirst, no affixes
        assert_eq!(out, b"Word");
    }

    #[test]
    fn omit_first_n_then_suffix() {
        let out = apply_transform(b"words", 3); // OmitFirst(1)
        assert_eq!(out, b"ords");
    }

    #[test]
    fn lookup_rejects_out_of_range_length() {
        assert!(lookup(3, 0).is_err());
        assert!(lookup(25, 0).is_err());
    }
}
