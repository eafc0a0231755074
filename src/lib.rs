//! Streaming decompressors for Brotli, BZip2 and DEFLATE, plus the XFLATE
//! meta-encoding that hides a small payload inside an empty DEFLATE block.
//!
//! Each format lives in its own module behind a `Decoder<R>` that wraps a
//! byte source and exposes `std::io::Read`-style streaming decompression;
//! `xflate` is a pair of free functions instead, since it has no streaming
//! state worth keeping around a reader.
#![allow(clippy::too_many_arguments)]
#![warn(clippy::indexing_slicing, clippy::unwrap_used, clippy::panic)]

pub mod bitstream;
pub mod bzip2;
pub mod brotli;
pub mod crc32;
pub mod deflate;
pub mod dictionary;
mod mtf;
pub mod prefix;
pub mod sais;
mod tables;
pub mod xflate;

pub mod error;

pub use crate::error::{StreamError, StreamErrorKind};
