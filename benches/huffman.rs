#![feature(test)]

#[cfg(test)]
mod tests {
    extern crate test;

    use std::ops::BitXor;
    use streamcore::crc32::{Crc32Reflected, Crc32Unreflected};

    #[bench]
    fn crc32_reflected_bench(b: &mut test::Bencher) {
        let input: [u8; 2064] = std::array::from_fn(|i| (i as u8).bitxor((i >> 8) as u8));
        b.iter(|| {
            let mut crc = Crc32Reflected::default();
            crc.write(&input);
            crc.finish()
        });
    }

    #[bench]
    fn crc32_unreflected_bench(b: &mut test::Bencher) {
        let input: [u8; 2064] = std::array::from_fn(|i| (i as u8).bitxor((i >> 8) as u8));
        b.iter(|| {
            let mut crc = Crc32Unreflected::default();
            crc.write(&input);
            crc.finish()
        });
    }
}
