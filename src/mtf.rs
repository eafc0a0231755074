//! Move-to-front transform and bijective base-2 RUNA/RUNB run-length coding
//! (spec §4.F), used by BZip2 between the inverse BWT and the Huffman stage.

/// Move-to-front state: the dictionary is always the sorted set of bytes
/// actually present in the block, rotated as symbols are seen.
pub struct Mtf {
    dict: Vec<u8>,
}

impl Mtf {
    /// `present` must already be sorted ascending and deduplicated.
    pub fn new(present: Vec<u8>) -> Self {
        Mtf { dict: present }
    }

    fn rank_of(&self, byte: u8) -> usize {
        self.dict.iter().position(|&b| b == byte).expect("byte not in dictionary")
    }

    fn rotate_to_front(&mut self, rank: usize) {
        let b = self.dict.remove(rank);
        self.dict.insert(0, b);
    }

    pub fn encode_one(&mut self, byte: u8) -> usize {
        let rank = self.rank_of(byte);
        self.rotate_to_front(rank);
        rank
    }

    pub fn decode_one(&mut self, rank: usize) -> u8 {
        let b = self.dict[rank];
        self.rotate_to_front(rank);
        b
    }
}

/// Encodes `bytes` against the MTF dictionary of symbols present in the
/// block, producing indices with runs of index 0 replaced by RUNA/RUNB
/// bit-pairs (returned pre-expanded as a count per run, not yet mapped to
/// Huffman symbols; the caller maps 0 => RUNA/RUNB and `n` (n >= 1) => `n + 1`
/// in the final alphabet per spec §4.F).
pub fn encode(bytes: &[u8], present: Vec<u8>) -> Vec<u32> {
    let mut mtf = Mtf::new(present);
    let mut out = Vec::with_capacity(bytes.len());
    let mut zero_run: u64 = 0;
    for &byte in bytes {
        let rank = mtf.encode_one(byte);
        if rank == 0 {
            zero_run += 1;
        } else {
            if zero_run > 0 {
                out.extend(encode_run(zero_run));
                zero_run = 0;
            }
            out.push(rank as u32 + 1);
        }
    }
    if zero_run > 0 {
        out.extend(encode_run(zero_run));
    }
    out
}

/// Encodes a run length `n >= 1` as bijective base-2 RUNA(0)/RUNB(1) digits,
/// least-significant digit first, returned as a sequence of the sentinel
/// values 0 (RUNA) and 1 (RUNB) for the caller to map to symbols.
fn encode_run(mut n: u64) -> Vec<u32> {
    let mut digits = Vec::new();
    while n > 0 {
        n -= 1;
        digits.push((n % 2) as u32);
        n /= 2;
    }
    digits
}

/// Decodes a sequence of RUNA(0)/RUNB(1) digit values (LSB-first, as
/// produced by `encode_run`) back into the run length.
pub fn decode_run(digits: &[u32]) -> u64 {
    let mut n: u64 = 0;
    for (k, &d) in digits.iter().enumerate() {
        n += (1u64 << k) * (d as u64 + 1);
    }
    n
}

/// Inverts `encode`: `symbols` is the final BZip2 alphabet (RUNA=0, RUNB=1,
/// `2..=dict.len()` mapping to rank `sym - 1`, with EOF handled by the
/// caller before this is invoked). `present` is the same sorted byte set
/// used during encoding.
pub fn decode(symbols: &[u32], present: Vec<u8>) -> Vec<u8> {
    let mut mtf = Mtf::new(present);
    let mut out = Vec::new();
    let mut run_digits = Vec::new();
    for &sym in symbols {
        match sym {
            0 | 1 => run_digits.push(sym),
            _ => {
                if !run_digits.is_empty() {
                    let n = decode_run(&run_digits);
                    run_digits.clear();
                    for _ in 0..n {
                        out.push(mtf.decode_one(0));
                    }
                }
                out.push(mtf.decode_one(sym as usize - 1));
            }
        }
    }
    if !run_digits.is_empty() {
        let n = decode_run(&run_digits);
        for _ in 0..n {
            out.push(mtf.decode_one(0));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_length_round_trips() {
        for n in 1u64..=200 {
            let digits = encode_run(n);
            assert_eq!(decode_run(&digits), n);
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let present = vec![b'a', b'b', b'n'];
        let text = b"banana".to_vec();
        let symbols = encode(&text, present.clone());
        let back = decode(&symbols, present);
        assert_eq!(back, text);
    }

    #[test]
    fn long_zero_run_round_trips() {
        let present = vec![b'x', b'y'];
        let text = vec![b'x'; 50];
        let symbols = encode(&text, present.clone());
        let back = decode(&symbols, present);
        assert_eq!(back, text);
    }
}
