//! Byte sources the interpreter reads from.
//!
//! There are two: [`BitReader`] over the input slice, and [`PipeStream`],
//! which materialises bytes on demand by running a producer type against an
//! outer source. Both support LSB-first bit reads; a byte-level read while a
//! bit read is in progress is an alignment error rather than a silent skip.

use super::{BinaryError, Machine, ReadError};
use crate::core::TypeId;

/// A saved position, including partial bit state.
#[derive(Debug, Copy, Clone)]
pub struct Checkpoint {
    pos: usize,
    bits: Option<(u8, u8)>,
}

pub trait Source {
    /// Read exactly `count` bytes.
    fn read(&mut self, machine: &mut Machine, count: usize) -> Result<Vec<u8>, BinaryError>;

    /// Read `count` bits, LSB first within each byte.
    fn read_bits(&mut self, machine: &mut Machine, count: u32) -> Result<u64, BinaryError>;

    /// Current byte offset, when the source has one. Pipe streams don't:
    /// their content has no stable address in the input.
    fn tell(&self) -> Option<u64>;

    fn seek(&mut self, pos: u64) -> Result<(), BinaryError>;

    /// Save the position for later [`Source::restore`]; `None` when the
    /// source cannot seek.
    fn checkpoint(&self) -> Option<Checkpoint>;

    fn restore(&mut self, checkpoint: Checkpoint);

    /// Whether the source can produce at least one more byte. May pull from
    /// a producer to find out.
    fn at_end(&mut self, machine: &mut Machine) -> Result<bool, BinaryError>;
}

/// Reader over the input slice.
pub struct BitReader<'data> {
    data: &'data [u8],
    pos: usize,
    /// In-progress byte and the number of bits already consumed from it.
    bits: Option<(u8, u8)>,
}

impl<'data> BitReader<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bits: None,
        }
    }
}

impl<'data> Source for BitReader<'data> {
    fn read(&mut self, _machine: &mut Machine, count: usize) -> Result<Vec<u8>, BinaryError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.bits.is_some() {
            return Err(BinaryError::Read(ReadError::UnalignedRead));
        }
        let available = self.data.len().saturating_sub(self.pos);
        if available < count {
            return Err(BinaryError::Read(ReadError::UnexpectedEof {
                needed: count,
                available,
            }));
        }
        let bytes = self.data[self.pos..self.pos + count].to_vec();
        self.pos += count;
        Ok(bytes)
    }

    fn read_bits(&mut self, _machine: &mut Machine, count: u32) -> Result<u64, BinaryError> {
        let mut value = 0u64;
        for i in 0..count {
            let (byte, used) = match self.bits {
                Some(pair) => pair,
                None => {
                    if self.pos >= self.data.len() {
                        return Err(BinaryError::Read(ReadError::UnexpectedEof {
                            needed: 1,
                            available: 0,
                        }));
                    }
                    let byte = self.data[self.pos];
                    self.pos += 1;
                    (byte, 0)
                }
            };
            value |= (((byte >> used) & 1) as u64) << i;
            let used = used + 1;
            self.bits = if used == 8 { None } else { Some((byte, used)) };
        }
        Ok(value)
    }

    fn tell(&self) -> Option<u64> {
        Some(self.pos as u64)
    }

    fn seek(&mut self, pos: u64) -> Result<(), BinaryError> {
        // Seeking realigns: partial bit state never survives a jump.
        self.bits = None;
        self.pos = pos as usize;
        Ok(())
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        Some(Checkpoint {
            pos: self.pos,
            bits: self.bits,
        })
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.bits = checkpoint.bits;
    }

    fn at_end(&mut self, _machine: &mut Machine) -> Result<bool, BinaryError> {
        Ok(self.bits.is_none() && self.pos >= self.data.len())
    }
}

/// Buffer shared between a pipe's producer and consumer. Appended bytes keep
/// their offsets, so pipe-relative pointers can address consumed data too.
#[derive(Debug, Default)]
pub struct PipeBuf {
    pub data: Vec<u8>,
    pub pos: usize,
}

impl PipeBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Offset one past the last byte written; negative pipe-pointer
    /// addresses count back from here.
    pub fn write_pos(&self) -> usize {
        self.data.len()
    }

    pub fn take(&mut self, count: usize) -> Vec<u8> {
        let count = count.min(self.available());
        let bytes = self.data[self.pos..self.pos + count].to_vec();
        self.pos += count;
        bytes
    }
}

/// The consumer-facing side of `Left | Right`.
pub struct PipeStream<'outer> {
    outer: &'outer mut dyn Source,
    left: TypeId,
    /// A yielding producer runs once and fills the buffer as it goes; a
    /// plain producer is pulled repeatedly, one parse per shortfall.
    left_yields: bool,
    exhausted: bool,
    pub buf: PipeBuf,
    bits: Option<(u8, u8)>,
}

impl<'outer> PipeStream<'outer> {
    pub fn new(outer: &'outer mut dyn Source, left: TypeId, left_yields: bool) -> Self {
        Self {
            outer,
            left,
            left_yields,
            exhausted: false,
            buf: PipeBuf::new(),
            bits: None,
        }
    }

    fn ensure(&mut self, machine: &mut Machine, need: usize) -> Result<(), BinaryError> {
        while self.buf.available() < need {
            if self.exhausted {
                return Err(BinaryError::Read(ReadError::UnexpectedEof {
                    needed: need,
                    available: self.buf.available(),
                }));
            }
            if self.left_yields {
                // The whole producer runs in one go.
                self.exhausted = true;
                machine.run_pipe_producer(self.left, &mut *self.outer, &mut self.buf)?;
            } else {
                let before = self.buf.data.len();
                machine.run_pipe_producer(self.left, &mut *self.outer, &mut self.buf)?;
                if self.buf.data.len() == before {
                    return Err(BinaryError::PipeType {
                        type_name: machine.describe_type(self.left),
                        message: "pipe source produced no bytes".to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl<'outer> Source for PipeStream<'outer> {
    fn read(&mut self, machine: &mut Machine, count: usize) -> Result<Vec<u8>, BinaryError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.bits.is_some() {
            return Err(BinaryError::Read(ReadError::UnalignedRead));
        }
        self.ensure(machine, count)?;
        Ok(self.buf.take(count))
    }

    fn read_bits(&mut self, machine: &mut Machine, count: u32) -> Result<u64, BinaryError> {
        let mut value = 0u64;
        for i in 0..count {
            let (byte, used) = match self.bits {
                Some(pair) => pair,
                None => {
                    self.ensure(machine, 1)?;
                    (self.buf.take(1)[0], 0)
                }
            };
            value |= (((byte >> used) & 1) as u64) << i;
            let used = used + 1;
            self.bits = if used == 8 { None } else { Some((byte, used)) };
        }
        Ok(value)
    }

    fn tell(&self) -> Option<u64> {
        None
    }

    fn seek(&mut self, _pos: u64) -> Result<(), BinaryError> {
        Err(BinaryError::Read(ReadError::UnsupportedSeek))
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        None
    }

    fn restore(&mut self, _checkpoint: Checkpoint) {
        unreachable!("pipe streams produce no checkpoints");
    }

    fn at_end(&mut self, machine: &mut Machine) -> Result<bool, BinaryError> {
        if self.bits.is_some() || self.buf.available() > 0 {
            return Ok(false);
        }
        match self.ensure(machine, 1) {
            Ok(()) => Ok(false),
            Err(BinaryError::Read(ReadError::UnexpectedEof { .. })) => Ok(true),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binary::Machine;
    use crate::core::Types;
    use crate::driver::Options;
    use crate::source::StringInterner;

    fn with_machine(f: impl FnOnce(&mut Machine)) {
        let mut interner = StringInterner::new();
        let types = Types::new(&mut interner);
        let options = Options::default();
        let mut machine = Machine::new(&types, &interner, &options);
        f(&mut machine);
    }

    #[test]
    fn bits_come_out_lsb_first() {
        with_machine(|machine| {
            let data = [0b0000_0111u8, 0xff];
            let mut reader = BitReader::new(&data);

            assert_eq!(reader.read_bits(machine, 1).unwrap(), 1);
            assert_eq!(reader.read_bits(machine, 1).unwrap(), 1);
            assert_eq!(reader.read_bits(machine, 2).unwrap(), 0b01);
            // Mid-byte byte reads are alignment errors.
            assert!(matches!(
                reader.read(machine, 1),
                Err(BinaryError::Read(ReadError::UnalignedRead))
            ));
            // Finish the byte; the next byte read works again.
            assert_eq!(reader.read_bits(machine, 4).unwrap(), 0);
            assert_eq!(reader.read(machine, 1).unwrap(), vec![0xff]);
        });
    }

    #[test]
    fn seeking_discards_bit_state() {
        with_machine(|machine| {
            let data = [0b1010_1010u8, 0x42];
            let mut reader = BitReader::new(&data);

            reader.read_bits(machine, 3).unwrap();
            reader.seek(1).unwrap();
            assert_eq!(reader.read(machine, 1).unwrap(), vec![0x42]);
        });
    }

    #[test]
    fn checkpoints_restore_partial_bits() {
        with_machine(|machine| {
            let data = [0b0000_0110u8];
            let mut reader = BitReader::new(&data);

            reader.read_bits(machine, 1).unwrap();
            let checkpoint = reader.checkpoint().unwrap();
            assert_eq!(reader.read_bits(machine, 2).unwrap(), 0b11);
            reader.restore(checkpoint);
            assert_eq!(reader.read_bits(machine, 2).unwrap(), 0b11);
        });
    }

    #[test]
    fn pipe_buf_keeps_consumed_offsets() {
        let mut buf = PipeBuf::new();
        buf.append(&[1, 2, 3, 4]);
        assert_eq!(buf.take(2), vec![1, 2]);
        assert_eq!(buf.available(), 2);
        assert_eq!(buf.write_pos(), 4);
        buf.append(&[5]);
        // Consumed bytes are still addressable from the start.
        assert_eq!(buf.data[0], 1);
        assert_eq!(buf.take(3), vec![3, 4, 5]);
    }
}
