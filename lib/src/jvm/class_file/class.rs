use super::{
    Attribute, ByteReader, ClassConstantIndex, ConstantsPool, Deserialize, Field, Method,
    Serialize, Version,
};
use crate::jvm::{ClassAccessFlags, Error, MalformedKind};
use byteorder::WriteBytesExt;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` has no superclass
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: u32 = 0xCAFEBABE;

    /// Parse a complete class file
    ///
    /// This checks the structure and the constant pool, but not the contents of attributes.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = ByteReader::new(bytes);
        let class_file = ClassFile::deserialize(&mut reader)?;
        reader.finish()?;
        Ok(class_file)
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Name of the class, as stored in the constant pool
    pub fn class_name(&self) -> Result<String, MalformedKind> {
        self.constants.class_name(self.this_class.0 .0)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            Some(super_class) => super_class.serialize(writer)?,
            None => 0u16.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        let magic = reader.read_u32()?;
        if magic != ClassFile::MAGIC {
            return Err(MalformedKind::BadMagic(magic).into());
        }
        let version = Version::deserialize(reader)?;
        let constants = ConstantsPool::deserialize(reader)?;
        let access_flags = ClassAccessFlags::from_bits_truncate(reader.read_u16()?);

        let this_class = ClassConstantIndex::deserialize(reader)?;
        constants.class_name(this_class.0 .0)?;
        let super_class = match ClassConstantIndex::deserialize(reader)? {
            ClassConstantIndex(idx) if idx.0 == 0 => None,
            super_class => {
                constants.class_name(super_class.0 .0)?;
                Some(super_class)
            }
        };
        let interfaces = Vec::<ClassConstantIndex>::deserialize(reader)?;
        for interface in &interfaces {
            constants.class_name(interface.0 .0)?;
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// `public class Empty extends java.lang.Object` with no members
    fn empty_class() -> ClassFile {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class("Empty").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    #[test]
    fn header_layout() {
        let bytes = empty_class().to_bytes().unwrap();
        assert_eq!(&bytes[0..8], &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52]);

        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.version, Version::JAVA8);
        assert_eq!(parsed.class_name().unwrap(), "Empty");
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn rejects_bad_magic_and_trailing_bytes() {
        let mut bytes = empty_class().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::MalformedInput(MalformedKind::TrailingBytes { .. }))
        ));

        bytes[0] = 0xCB;
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::MalformedInput(MalformedKind::BadMagic(0xCBFEBABE)))
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = empty_class().to_bytes().unwrap();
        bytes[6] = 0;
        bytes[7] = 44;
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::MalformedInput(MalformedKind::UnsupportedVersion(_)))
        ));
    }

    #[test]
    fn truncated_input() {
        let bytes = empty_class().to_bytes().unwrap();
        for len in [3, 9, bytes.len() - 1] {
            assert!(matches!(
                ClassFile::parse(&bytes[..len]),
                Err(Error::MalformedInput(MalformedKind::Truncated { .. }))
            ));
        }
    }
}
