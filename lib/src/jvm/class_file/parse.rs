use crate::jvm::{Error, MalformedKind};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

/// Cursor over the bytes of a class file (or of an attribute inside one)
///
/// Every read reports running out of input as [`MalformedKind::Truncated`], with the offset at
/// which the read started.
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteReader<'a> {
        ByteReader {
            cursor: Cursor::new(bytes),
        }
    }

    /// Offset of the next byte to be read
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn is_exhausted(&self) -> bool {
        self.position() >= self.cursor.get_ref().len()
    }

    /// Fail unless every byte has been consumed
    pub fn finish(&self) -> Result<(), MalformedKind> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(MalformedKind::TrailingBytes {
                offset: self.position(),
            })
        }
    }

    fn truncated(&self) -> MalformedKind {
        MalformedKind::Truncated {
            offset: self.position(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_u8()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    pub fn read_i8(&mut self) -> Result<i8, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_i8()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    pub fn read_u16(&mut self) -> Result<u16, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    pub fn read_i16(&mut self) -> Result<i16, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_i16::<BigEndian>()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    pub fn read_u32(&mut self) -> Result<u32, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    pub fn read_i32(&mut self) -> Result<i32, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    pub fn read_u64(&mut self) -> Result<u64, MalformedKind> {
        let offset = self.position();
        self.cursor
            .read_u64::<BigEndian>()
            .map_err(|_| MalformedKind::Truncated { offset })
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], MalformedKind> {
        let bytes: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        let end = start.checked_add(len).ok_or_else(|| self.truncated())?;
        let slice = bytes.get(start..end).ok_or_else(|| self.truncated())?;
        self.cursor.set_position(end as u64);
        Ok(slice)
    }

    /// Skip ahead until the position is a multiple of four (for switch padding)
    pub fn align_to_4(&mut self) -> Result<(), MalformedKind> {
        let padding = (4 - self.position() % 4) % 4;
        self.read_bytes(padding).map(|_| ())
    }
}

/// Counterpart of [`super::Serialize`], for reading structures back
pub trait Deserialize: Sized {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error>;
}

impl Deserialize for u16 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(reader.read_u16()?)
    }
}

/// Size in `u16` is the first thing deserialized
impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        let len = reader.read_u16()?;
        (0..len).map(|_| A::deserialize(reader)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_big_endian() {
        let mut reader = ByteReader::new(&[0xCA, 0xFE, 0xBA, 0xBE, 0xFF, 0x00, 0x01]);
        assert_eq!(reader.read_u32().unwrap(), 0xCAFEBABE);
        assert_eq!(reader.read_i16().unwrap(), -256);
        assert!(reader.finish().is_err());
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn truncation_reports_start_offset() {
        let mut reader = ByteReader::new(&[0x00, 0x01, 0x02]);
        reader.read_u8().unwrap();
        match reader.read_u32() {
            Err(MalformedKind::Truncated { offset }) => assert_eq!(offset, 1),
            other => panic!("expected truncation, got {:?}", other),
        }
        assert!(matches!(
            reader.read_bytes(5),
            Err(MalformedKind::Truncated { .. })
        ));
    }
}
