use libafl_bolts::rands::{Rand, StdRand};

use super::InputRecord;

/// Flat byte stream with a read cursor.
///
/// In extensible mode, reading past the recorded bytes appends fresh
/// random ones, so a generator consumes exactly as much randomness as it
/// needs and the grown vector becomes the saved input.
#[derive(Debug)]
pub struct LinearStream {
    bytes: Vec<u8>,
    cursor: usize,
    fixed_size: bool,
    rng: StdRand,
}

impl LinearStream {
    pub fn new(bytes: Vec<u8>, fixed_size: bool, rng: StdRand) -> Self {
        Self {
            bytes,
            cursor: 0,
            fixed_size,
            rng,
        }
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        if self.cursor == self.bytes.len() {
            if self.fixed_size {
                return None;
            }
            self.bytes.push(self.rng.next() as u8);
        }
        let byte = self.bytes[self.cursor];
        self.cursor += 1;
        Some(byte)
    }

    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// The consumed prefix. Bytes a mutated parent carried beyond what
    /// this trial read are dropped.
    pub fn into_record(mut self) -> InputRecord {
        self.bytes.truncate(self.cursor);
        InputRecord::Linear { bytes: self.bytes }
    }
}
