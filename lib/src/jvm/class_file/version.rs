use super::{ByteReader, Deserialize, Serialize};
use crate::jvm::{Error, MalformedKind};
use byteorder::WriteBytesExt;

/// Class file format version
///
/// Ordering compares major versions first, then minor versions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const JAVA1_1: Version = Version::new(45, 3);
    pub const JAVA5: Version = Version::new(49, 0);
    pub const JAVA6: Version = Version::new(50, 0);
    pub const JAVA8: Version = Version::new(52, 0);
    pub const JAVA11: Version = Version::new(55, 0);
    pub const JAVA17: Version = Version::new(61, 0);

    /// Newest major version this crate knows how to handle
    pub const LATEST_MAJOR: u16 = 69;

    pub const fn new(major: u16, minor: u16) -> Version {
        Version { major, minor }
    }

    /// Starting with Java 6, methods carry `StackMapTable` attributes for the type-checking
    /// verifier
    pub fn uses_stack_map_frames(&self) -> bool {
        self.major >= 50
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor.serialize(writer)?;
        self.major.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        let minor = reader.read_u16()?;
        let major = reader.read_u16()?;
        let version = Version { major, minor };
        if major < 45 || major > Version::LATEST_MAJOR {
            return Err(Error::MalformedInput(MalformedKind::UnsupportedVersion(
                version,
            )));
        }
        Ok(version)
    }
}
