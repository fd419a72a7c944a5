use super::{Attribute, AttributeLike, ByteReader, Deserialize, Serialize};
use crate::jvm::{ConstantPoolOverflow, Error, MalformedKind};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::result::Result;

/// Class file constants pool
///
/// A pool read from an existing class keeps every entry at its original index, so attributes
/// copied byte-for-byte from that class stay valid. New entries are only ever appended, and
/// requests for an entry that already exists (anywhere in the pool) return the existing index.
#[derive(Clone, Debug)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,
    indices: HashMap<Constant, ConstantIndex>,
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            indices: HashMap::new(),
        }
    }

    /// Number of entries in the pool
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate through the entries and their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(offset, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    /// Look up the entry at an index
    pub fn get(&self, index: u16) -> Result<&Constant, MalformedKind> {
        self.constants
            .get_offset(Offset(index as usize))
            .ok_or(MalformedKind::BadConstantIndex(index))
    }

    pub fn utf8(&self, index: u16) -> Result<&ModifiedUtf8, MalformedKind> {
        match self.get(index)? {
            Constant::Utf8(utf8) => Ok(utf8),
            _ => Err(MalformedKind::WrongConstantKind {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Look up a `Utf8` entry and decode it
    pub fn utf8_string(&self, index: u16) -> Result<String, MalformedKind> {
        self.utf8(index)?
            .to_string()
            .ok_or(MalformedKind::InvalidModifiedUtf8(index))
    }

    /// Look up the (undecoded) name inside a `Class` entry
    pub fn class_name(&self, index: u16) -> Result<String, MalformedKind> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8_string(name.0 .0),
            _ => Err(MalformedKind::WrongConstantKind {
                index,
                expected: "Class",
            }),
        }
    }

    /// Look up the name and descriptor strings inside a `NameAndType` entry
    pub fn name_and_type(&self, index: u16) -> Result<(String, String), MalformedKind> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => Ok((
                self.utf8_string(name.0 .0)?,
                self.utf8_string(descriptor.0 .0)?,
            )),
            _ => Err(MalformedKind::WrongConstantKind {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65534, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let offset: usize = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }

        let index = ConstantIndex(offset as u16);
        self.indices.entry(constant.clone()).or_insert(index);
        self.constants.push(constant);
        Ok(index)
    }

    /// Get the index of an equal entry, inserting one if there is none yet
    pub fn get_or_insert(
        &mut self,
        constant: Constant,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.indices.get(&constant) {
            Some(index) => Ok(*index),
            None => self.push_constant(constant),
        }
    }

    pub fn get_utf8(&mut self, string: &str) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        self.get_modified_utf8(ModifiedUtf8::from(string))
    }

    pub fn get_modified_utf8(
        &mut self,
        utf8: ModifiedUtf8,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        self.get_or_insert(Constant::Utf8(utf8))
            .map(Utf8ConstantIndex)
    }

    /// Get or insert a `Class` entry, given the name as it appears in the entry
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        self.get_or_insert(Constant::Class(name))
            .map(ClassConstantIndex)
    }

    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        self.get_or_insert(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    /// Encode an attribute, registering its name in the pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: &A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// Check that an index refers to an entry matching `is_expected`
    fn expect(
        &self,
        index: u16,
        expected: &'static str,
        is_expected: impl Fn(&Constant) -> bool,
    ) -> Result<(), MalformedKind> {
        if is_expected(self.get(index)?) {
            Ok(())
        } else {
            Err(MalformedKind::WrongConstantKind { index, expected })
        }
    }

    /// Check that every reference between entries points at an entry of the right kind
    fn validate(&self) -> Result<(), MalformedKind> {
        let is_utf8 = |c: &Constant| matches!(c, Constant::Utf8(_));
        let is_class = |c: &Constant| matches!(c, Constant::Class(_));
        let is_name_and_type = |c: &Constant| matches!(c, Constant::NameAndType { .. });

        for (_, constant) in self.iter() {
            match constant {
                Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => (),
                Constant::Class(name)
                | Constant::String(name)
                | Constant::Module(name)
                | Constant::Package(name)
                | Constant::MethodType { descriptor: name } => {
                    self.expect(name.0 .0, "Utf8", is_utf8)?
                }
                Constant::FieldRef(class, name_and_type)
                | Constant::MethodRef {
                    class,
                    name_and_type,
                    ..
                } => {
                    self.expect(class.0 .0, "Class", is_class)?;
                    self.expect(name_and_type.0 .0, "NameAndType", is_name_and_type)?;
                }
                Constant::NameAndType { name, descriptor } => {
                    self.expect(name.0 .0, "Utf8", is_utf8)?;
                    self.expect(descriptor.0 .0, "Utf8", is_utf8)?;
                }
                Constant::MethodHandle {
                    handle_kind,
                    member,
                } => match handle_kind {
                    HandleKind::GetField
                    | HandleKind::GetStatic
                    | HandleKind::PutField
                    | HandleKind::PutStatic => self.expect(member.0, "Fieldref", |c| {
                        matches!(c, Constant::FieldRef(_, _))
                    })?,
                    HandleKind::InvokeVirtual | HandleKind::NewInvokeSpecial => {
                        self.expect(member.0, "Methodref", |c| {
                            matches!(
                                c,
                                Constant::MethodRef {
                                    is_interface: false,
                                    ..
                                }
                            )
                        })?
                    }
                    HandleKind::InvokeStatic | HandleKind::InvokeSpecial => {
                        self.expect(member.0, "Methodref", |c| {
                            matches!(c, Constant::MethodRef { .. })
                        })?
                    }
                    HandleKind::InvokeInterface => {
                        self.expect(member.0, "InterfaceMethodref", |c| {
                            matches!(
                                c,
                                Constant::MethodRef {
                                    is_interface: true,
                                    ..
                                }
                            )
                        })?
                    }
                },
                Constant::Dynamic { name_and_type, .. }
                | Constant::InvokeDynamic { name_and_type, .. } => {
                    self.expect(name_and_type.0 .0, "NameAndType", is_name_and_type)?
                }
            }
        }
        Ok(())
    }
}

impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.constants.offset_len().0 as u16).serialize(writer)?;
        for (_, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantsPool {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u16()? as usize;
        let mut pool = ConstantsPool::new();
        while pool.constants.offset_len().0 < count {
            let index = pool.constants.offset_len().0 as u16;
            let constant = Constant::deserialize(index, reader)?;
            pool.indices.entry(constant.clone()).or_insert(ConstantIndex(index));
            pool.constants.push(constant);
        }

        // A wide constant in the last slot would overrun the declared count
        if pool.constants.offset_len().0 != count.max(1) {
            return Err(Error::MalformedInput(MalformedKind::BadConstantIndex(
                count as u16,
            )));
        }

        pool.validate()?;
        Ok(pool)
    }
}

/// Constants as in the constant pool
///
/// Floating point values are stored as their raw bits, so that every constant (including NaNs
/// with payloads) survives a round trip unchanged.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Constant modified UTF-8 encoded string value (names, descriptors, string literals)
    Utf8(ModifiedUtf8),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(u32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(u64),

    /// Class or an interface (or array type)
    Class(Utf8ConstantIndex),

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// `FieldRef` for field handles and `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    fn deserialize(index: u16, reader: &mut ByteReader<'_>) -> Result<Constant, Error> {
        let utf8 = |reader: &mut ByteReader<'_>| -> Result<Utf8ConstantIndex, MalformedKind> {
            Ok(Utf8ConstantIndex(ConstantIndex(reader.read_u16()?)))
        };
        let class = |reader: &mut ByteReader<'_>| -> Result<ClassConstantIndex, MalformedKind> {
            Ok(ClassConstantIndex(ConstantIndex(reader.read_u16()?)))
        };
        let name_and_type =
            |reader: &mut ByteReader<'_>| -> Result<NameAndTypeConstantIndex, MalformedKind> {
                Ok(NameAndTypeConstantIndex(ConstantIndex(reader.read_u16()?)))
            };

        let tag = reader.read_u8()?;
        let constant = match tag {
            1 => {
                let len = reader.read_u16()? as usize;
                let bytes = reader.read_bytes(len)?;
                Constant::Utf8(ModifiedUtf8(bytes.to_vec()))
            }
            3 => Constant::Integer(reader.read_i32()?),
            4 => Constant::Float(reader.read_u32()?),
            5 => Constant::Long(reader.read_u64()? as i64),
            6 => Constant::Double(reader.read_u64()?),
            7 => Constant::Class(utf8(reader)?),
            8 => Constant::String(utf8(reader)?),
            9 => Constant::FieldRef(class(reader)?, name_and_type(reader)?),
            10 | 11 => Constant::MethodRef {
                class: class(reader)?,
                name_and_type: name_and_type(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: utf8(reader)?,
                descriptor: utf8(reader)?,
            },
            15 => {
                let kind = reader.read_u8()?;
                Constant::MethodHandle {
                    handle_kind: HandleKind::from_u8(kind)
                        .ok_or(MalformedKind::InvalidHandleKind(kind))?,
                    member: ConstantIndex(reader.read_u16()?),
                }
            }
            16 => Constant::MethodType {
                descriptor: utf8(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: reader.read_u16()?,
                name_and_type: name_and_type(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: reader.read_u16()?,
                name_and_type: name_and_type(reader)?,
            },
            19 => Constant::Module(utf8(reader)?),
            20 => Constant::Package(utf8(reader)?),
            _ => return Err(MalformedKind::UnknownConstantTag { index, tag }.into()),
        };
        Ok(constant)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(utf8) => {
                1u8.serialize(writer)?;
                (utf8.0.len() as u16).serialize(writer)?;
                writer.write_all(&utf8.0)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(bits) => {
                4u8.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(bits) => {
                6u8.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(string) => {
                8u8.serialize(writer)?;
                string.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if *is_interface { 11u8 } else { 10u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                (*handle_kind as u8).serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for Utf8ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for ClassConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for NameAndTypeConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Utf8ConstantIndex {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Utf8ConstantIndex(ConstantIndex(reader.read_u16()?)))
    }
}

impl Deserialize for ClassConstantIndex {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(ClassConstantIndex(ConstantIndex(reader.read_u16()?)))
    }
}

/// Type of method handle
///
/// Discriminants are the `reference_kind` values of `CONSTANT_MethodHandle_info`.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl HandleKind {
    pub fn from_u8(kind: u8) -> Option<HandleKind> {
        let handle_kind = match kind {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        };
        Some(handle_kind)
    }

    /// Does the handle refer to a field (as opposed to a method)?
    pub fn is_field(&self) -> bool {
        matches!(
            self,
            HandleKind::GetField | HandleKind::GetStatic | HandleKind::PutField | HandleKind::PutStatic
        )
    }
}

/// Bytes of a `CONSTANT_Utf8_info`, kept in their encoded form
///
/// Most entries decode to a regular string, but the format can also carry unpaired surrogates
/// (which Rust strings can't represent). Keeping the bytes means those survive untouched.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ModifiedUtf8(Vec<u8>);

impl ModifiedUtf8 {
    pub fn from_bytes(bytes: Vec<u8>) -> ModifiedUtf8 {
        ModifiedUtf8(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode into a string, if the content is valid Unicode
    pub fn to_string(&self) -> Option<String> {
        decode_modified_utf8(&self.0)
    }
}

impl From<&str> for ModifiedUtf8 {
    fn from(string: &str) -> ModifiedUtf8 {
        ModifiedUtf8(encode_modified_utf8(string))
    }
}

impl Debug for ModifiedUtf8 {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.to_string() {
            Some(string) => Debug::fmt(&string, f),
            None => write!(f, "ModifiedUtf8({:?})", self.0),
        }
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units).iter().map(|u| *u as u32) {
            match unit {
                0x0001..=0x007F => buffer.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    buffer.push(0b1100_0000 | (unit >> 6 & 0x1F) as u8);
                    buffer.push(0b1000_0000 | (unit & 0x3F) as u8);
                }
                _ => {
                    buffer.push(0b1110_0000 | (unit >> 12 & 0x0F) as u8);
                    buffer.push(0b1000_0000 | (unit >> 6 & 0x3F) as u8);
                    buffer.push(0b1000_0000 | (unit & 0x3F) as u8);
                }
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Returns `None` for byte sequences that are not well-formed or that contain unpaired
/// surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b0) = iter.next() {
        let unit: u16 = match b0 {
            0x01..=0x7F => b0 as u16,
            0xC0..=0xDF => {
                let b1 = continuation(iter.next()?)?;
                (b0 as u16 & 0x1F) << 6 | b1
            }
            0xE0..=0xEF => {
                let b1 = continuation(iter.next()?)?;
                let b2 = continuation(iter.next()?)?;
                (b0 as u16 & 0x0F) << 12 | b1 << 6 | b2
            }
            _ => return None,
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

fn continuation(byte: u8) -> Option<u16> {
    if byte & 0b1100_0000 == 0b1000_0000 {
        Some((byte & 0x3F) as u16)
    } else {
        None
    }
}
