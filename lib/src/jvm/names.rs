use std::borrow::{Borrow, Cow};
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods and fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Internal (slash-separated) names of classes and interfaces
///
/// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: &str) -> Result<(), String>;

    /// Extract the raw underlying string name
    fn as_str(&self) -> &str;

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: &str) -> Result<(), String> {
        if name.is_empty() {
            Err(String::from("Unqualified name is empty"))
        } else if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else {
            Ok(())
        }
    }

    fn as_str(&self) -> &str {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }
}

impl Name for BinaryName {
    fn check_valid(name: &str) -> Result<(), String> {
        if name.is_empty() {
            return Err(String::from("Binary name is empty"));
        }
        for segment in name.split('/') {
            UnqualifiedName::check_valid(segment)
                .map_err(|_| format!("Binary name '{}' has an invalid segment", name))?;
        }
        Ok(())
    }

    fn as_str(&self) -> &str {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(BinaryName(Cow::Owned(name)))
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(&self.0)
    }
}

impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(&self.0)
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(&self.0)
    }
}

impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(&self.0)
    }
}

/// Lets maps keyed by `BinaryName` be queried with plain strings
impl Borrow<str> for BinaryName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // Special names - the only ones allowed angle brackets
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");
}

impl BinaryName {
    /// Name from a literal known to be valid
    pub(crate) const fn from_static(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    /// Name using dots instead of slashes, as in Java source and `Class.getName`
    pub fn to_java_name(&self) -> String {
        self.0.replace('/', ".")
    }

    pub const APPENDABLE: Self = Self::from_static("java/lang/Appendable");
    pub const CHARSEQUENCE: Self = Self::from_static("java/lang/CharSequence");
    pub const CLASS: Self = Self::from_static("java/lang/Class");
    pub const CLONEABLE: Self = Self::from_static("java/lang/Cloneable");
    pub const COMPARABLE: Self = Self::from_static("java/lang/Comparable");
    pub const ERROR: Self = Self::from_static("java/lang/Error");
    pub const EXCEPTION: Self = Self::from_static("java/lang/Exception");
    pub const METHODHANDLE: Self = Self::from_static("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::from_static("java/lang/invoke/MethodType");
    pub const NUMBER: Self = Self::from_static("java/lang/Number");
    pub const OBJECT: Self = Self::from_static("java/lang/Object");
    pub const RUNTIMEEXCEPTION: Self = Self::from_static("java/lang/RuntimeException");
    pub const SERIALIZABLE: Self = Self::from_static("java/io/Serializable");
    pub const STRING: Self = Self::from_static("java/lang/String");
    pub const THROWABLE: Self = Self::from_static("java/lang/Throwable");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_names() {
        let name = BinaryName::from_string(String::from("org/apache/Foo$Bar")).unwrap();
        assert_eq!(name.as_str(), "org/apache/Foo$Bar");
        assert_eq!(name.to_java_name(), "org.apache.Foo$Bar");

        assert!(BinaryName::from_string(String::from("")).is_err());
        assert!(BinaryName::from_string(String::from("a//b")).is_err());
        assert!(BinaryName::from_string(String::from("a.b")).is_err());
        assert!(BinaryName::from_string(String::from("[I")).is_err());
    }

    #[test]
    fn unqualified_names() {
        assert!(UnqualifiedName::from_string(String::from("substitute")).is_ok());
        assert!(UnqualifiedName::from_string(String::from("<init>")).is_ok());
        assert!(UnqualifiedName::from_string(String::from("a/b")).is_err());
        assert!(UnqualifiedName::from_string(String::from("a;")).is_err());
    }
}
