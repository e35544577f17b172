use libafl_bolts::rands::{Rand, StdRand};

use super::ChoiceKind;

/// Persisted form of a split input: the two choice streams plus the
/// merged access log recording the order in which structural and value
/// reads occurred during the trial that produced it.
///
/// The log is rebuilt on every generation; a mutated record is stored
/// with an empty log until its next run re-records the interleaving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitRecord {
    pub structure: Vec<u8>,
    pub value: Vec<u8>,
    pub log: Vec<ChoiceKind>,
}

#[derive(Debug)]
struct StreamHalf {
    bytes: Vec<u8>,
    cursor: usize,
}

impl StreamHalf {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, cursor: 0 }
    }

    fn next_byte(&mut self, fixed_size: bool, rng: &mut StdRand) -> Option<u8> {
        if self.cursor == self.bytes.len() {
            if fixed_size {
                return None;
            }
            self.bytes.push(rng.next() as u8);
        }
        let byte = self.bytes[self.cursor];
        self.cursor += 1;
        Some(byte)
    }
}

/// Two interleaved byte streams, one for structural decisions and one for
/// leaf values, with independent cursors and a shared access log.
#[derive(Debug)]
pub struct SplitStream {
    structure: StreamHalf,
    value: StreamHalf,
    log: Vec<ChoiceKind>,
    fixed_size: bool,
    rng: StdRand,
}

impl SplitStream {
    pub fn new(record: SplitRecord, fixed_size: bool, rng: StdRand) -> Self {
        Self {
            structure: StreamHalf::new(record.structure),
            value: StreamHalf::new(record.value),
            log: Vec::new(),
            fixed_size,
            rng,
        }
    }

    pub fn next_byte(&mut self, kind: ChoiceKind) -> Option<u8> {
        let half = match kind {
            ChoiceKind::Structure => &mut self.structure,
            ChoiceKind::Value => &mut self.value,
        };
        let byte = half.next_byte(self.fixed_size, &mut self.rng)?;
        self.log.push(kind);
        Some(byte)
    }

    pub fn consumed(&self) -> usize {
        self.structure.cursor + self.value.cursor
    }

    /// Consumed prefixes of both halves, with the freshly recorded log.
    pub fn into_record(mut self) -> SplitRecord {
        self.structure.bytes.truncate(self.structure.cursor);
        self.value.bytes.truncate(self.value.cursor);
        SplitRecord {
            structure: self.structure.bytes,
            value: self.value.bytes,
            log: self.log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRand {
        StdRand::with_seed(11)
    }

    #[test]
    fn access_log_records_interleaving() {
        let mut stream = SplitStream::new(SplitRecord::default(), false, rng());
        stream.next_byte(ChoiceKind::Structure);
        stream.next_byte(ChoiceKind::Value);
        stream.next_byte(ChoiceKind::Value);
        stream.next_byte(ChoiceKind::Structure);
        let record = stream.into_record();
        assert_eq!(
            record.log,
            vec![
                ChoiceKind::Structure,
                ChoiceKind::Value,
                ChoiceKind::Value,
                ChoiceKind::Structure,
            ]
        );
        assert_eq!(record.structure.len(), 2);
        assert_eq!(record.value.len(), 2);
    }

    #[test]
    fn halves_have_independent_cursors_and_eof() {
        let record = SplitRecord {
            structure: vec![1],
            value: vec![2, 3],
            log: Vec::new(),
        };
        let mut stream = SplitStream::new(record, true, rng());
        assert_eq!(stream.next_byte(ChoiceKind::Structure), Some(1));
        assert_eq!(stream.next_byte(ChoiceKind::Structure), None);
        // Structure EOF does not affect the value half.
        assert_eq!(stream.next_byte(ChoiceKind::Value), Some(2));
        assert_eq!(stream.next_byte(ChoiceKind::Value), Some(3));
        assert_eq!(stream.next_byte(ChoiceKind::Value), None);
    }

    #[test]
    fn replay_consumes_identical_bytes() {
        // A deterministic generator reading the same record sees the same
        // bytes in the same order, and re-records the same log.
        let mut first = SplitStream::new(SplitRecord::default(), false, rng());
        let mut reads = Vec::new();
        for kind in [
            ChoiceKind::Structure,
            ChoiceKind::Value,
            ChoiceKind::Structure,
        ] {
            reads.push(first.next_byte(kind).unwrap());
        }
        let record = first.into_record();

        let mut replay = SplitStream::new(record.clone(), true, rng());
        let replayed: Vec<_> = record
            .log
            .iter()
            .map(|&kind| replay.next_byte(kind).unwrap())
            .collect();
        assert_eq!(reads, replayed);
        assert_eq!(replay.into_record(), record);
    }
}
