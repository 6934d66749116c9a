//! # Sources — Lazy Bit Streams
//!
//! Two bit sources, both modeled as stateful iterators yielding `0`/`1`:
//! a byte-oriented device source (unbuffered, chunked, LSB-first within each
//! byte) and a seeded Bernoulli generator for validated synthetic streams.
//! The device source is finite (terminates on EOF); the synthetic source is
//! infinite.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A single bit, `0` or `1`.
pub type Bit = u8;

/// Default device read chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;

/// A lazy source of bits. `next_bit` returns `None` once the source is
/// exhausted (device EOF); the synthetic source never returns `None`.
pub trait BitSource {
    fn next_bit(&mut self) -> Option<Bit>;
}

/// Reads a byte-oriented path unbuffered in fixed-size chunks, yielding bits
/// LSB-first within each byte (bit 0 of byte k precedes bit 7, byte k
/// precedes byte k+1). Stops on a short read of 0 bytes.
pub struct DeviceBitSource {
    file: File,
    chunk_size: usize,
    buf: Vec<u8>,
    byte_pos: usize,
    bit_pos: u8,
    exhausted: bool,
}

impl DeviceBitSource {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open device path {}", path.display()))?;
        Ok(DeviceBitSource {
            file,
            chunk_size,
            buf: Vec::new(),
            byte_pos: 0,
            bit_pos: 0,
            exhausted: false,
        })
    }

    fn refill(&mut self) -> bool {
        let mut chunk = vec![0u8; self.chunk_size];
        let n = match self.file.read(&mut chunk) {
            Ok(n) => n,
            Err(_) => 0,
        };
        if n == 0 {
            self.exhausted = true;
            return false;
        }
        chunk.truncate(n);
        self.buf = chunk;
        self.byte_pos = 0;
        self.bit_pos = 0;
        true
    }
}

impl BitSource for DeviceBitSource {
    fn next_bit(&mut self) -> Option<Bit> {
        if self.exhausted {
            return None;
        }
        if self.byte_pos >= self.buf.len() && !self.refill() {
            return None;
        }
        let byte = self.buf[self.byte_pos];
        let bit = (byte >> self.bit_pos) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Some(bit)
    }
}

/// Seeded i.i.d. Bernoulli(p) bit generator. Infinite.
pub struct SyntheticBitSource {
    rng: StdRng,
    p: f64,
}

impl SyntheticBitSource {
    pub fn new(p: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            anyhow::bail!("p must be in [0,1], got {p}");
        }
        Ok(SyntheticBitSource {
            rng: StdRng::seed_from_u64(seed),
            p,
        })
    }
}

impl BitSource for SyntheticBitSource {
    fn next_bit(&mut self) -> Option<Bit> {
        let draw: f64 = self.rng.gen();
        Some(if draw < self.p { 1 } else { 0 })
    }
}

/// Derives a per-worker seed from a base seed and worker index, so that
/// parallel synthetic streams are uncorrelated:
/// `seed_i = base_seed XOR (i * 0x9E3779B97F4A7C15) mod 2^64`.
/// If `base_seed` is `None`, one is derived once from a high-resolution
/// wall-clock source.
pub fn derive_process_seed(base_seed: Option<u64>, proc_id: u64) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;
    let base = base_seed.unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    });
    base ^ proc_id.wrapping_mul(GOLDEN_GAMMA)
}
