use crate::jvm::class_file::{Constant, ConstantIndex, ConstantsPool, HandleKind, ModifiedUtf8};
use crate::jvm::descriptors::{ParseDescriptor, RenderDescriptor};
use crate::jvm::{
    BinaryName, ConstantPoolOverflow, FieldType, MalformedKind, MethodDescriptor, Name, RefType,
    UnqualifiedName,
};
use crate::util::Width;

/// Field, along with the class that holds it
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

/// Method, along with the class (or array type, for `clone`) that holds it
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: RefType<BinaryName>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,

    /// Is the owner an interface (ie. is the constant an `InterfaceMethodref`)?
    pub is_interface: bool,
}

/// Call site of an `invokedynamic`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvokeDynamic {
    /// Index into the `BootstrapMethods` attribute of the class
    pub bootstrap_method: u16,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

/// Dynamically-computed constant
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DynamicConstant {
    /// Index into the `BootstrapMethods` attribute of the class
    pub bootstrap_method: u16,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

/// Target of a method handle
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Field(FieldRef),
    Method(MethodRef),
}

/// Constants that can be pushed with `ldc`, `ldc_w`, or `ldc2_w`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstantData {
    Integer(i32),

    /// Raw bits of a `float`
    Float(u32),
    Long(i64),

    /// Raw bits of a `double`
    Double(u64),
    String(ModifiedUtf8),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),
    MethodHandle(HandleKind, MemberRef),
    Dynamic(DynamicConstant),
}

impl Width for ConstantData {
    fn width(&self) -> usize {
        match self {
            ConstantData::Long(_) | ConstantData::Double(_) => 2,
            ConstantData::Dynamic(dynamic) => dynamic.descriptor.width(),
            _ => 1,
        }
    }
}

fn binary_name(name: String) -> Result<BinaryName, MalformedKind> {
    BinaryName::from_string(name).map_err(MalformedKind::InvalidName)
}

fn unqualified_name(name: String) -> Result<UnqualifiedName, MalformedKind> {
    UnqualifiedName::from_string(name).map_err(MalformedKind::InvalidName)
}

fn descriptor<D: ParseDescriptor>(descriptor: &str) -> Result<D, MalformedKind> {
    D::parse(descriptor).map_err(MalformedKind::InvalidDescriptor)
}

fn wrong_kind(index: u16, expected: &'static str) -> MalformedKind {
    MalformedKind::WrongConstantKind { index, expected }
}

/// Resolving constants into symbolic operands (and back)
impl ConstantsPool {
    /// Resolve a `Class` entry into the type it names
    pub fn ref_type(&self, index: u16) -> Result<RefType<BinaryName>, MalformedKind> {
        let name = self.class_name(index)?;
        RefType::from_class_name(&name).map_err(MalformedKind::InvalidName)
    }

    pub fn field_ref(&self, index: u16) -> Result<FieldRef, MalformedKind> {
        match self.get(index)? {
            Constant::FieldRef(class, name_and_type) => {
                let owner = binary_name(self.class_name(class.0 .0)?)?;
                let (name, desc) = self.name_and_type(name_and_type.0 .0)?;
                Ok(FieldRef {
                    owner,
                    name: unqualified_name(name)?,
                    descriptor: descriptor(&desc)?,
                })
            }
            _ => Err(wrong_kind(index, "Fieldref")),
        }
    }

    pub fn method_ref(&self, index: u16) -> Result<MethodRef, MalformedKind> {
        match self.get(index)? {
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let (name, desc) = self.name_and_type(name_and_type.0 .0)?;
                Ok(MethodRef {
                    owner: self.ref_type(class.0 .0)?,
                    name: unqualified_name(name)?,
                    descriptor: descriptor(&desc)?,
                    is_interface: *is_interface,
                })
            }
            _ => Err(wrong_kind(index, "Methodref")),
        }
    }

    pub fn invoke_dynamic(&self, index: u16) -> Result<InvokeDynamic, MalformedKind> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                let (name, desc) = self.name_and_type(name_and_type.0 .0)?;
                Ok(InvokeDynamic {
                    bootstrap_method: *bootstrap_method,
                    name: unqualified_name(name)?,
                    descriptor: descriptor(&desc)?,
                })
            }
            _ => Err(wrong_kind(index, "InvokeDynamic")),
        }
    }

    /// Resolve the operand of an `ldc`, `ldc_w`, or `ldc2_w`
    pub fn loadable(&self, index: u16) -> Result<ConstantData, MalformedKind> {
        let constant = match self.get(index)? {
            Constant::Integer(int) => ConstantData::Integer(*int),
            Constant::Float(bits) => ConstantData::Float(*bits),
            Constant::Long(long) => ConstantData::Long(*long),
            Constant::Double(bits) => ConstantData::Double(*bits),
            Constant::String(utf8) => ConstantData::String(self.utf8(utf8.0 .0)?.clone()),
            Constant::Class(_) => ConstantData::Class(self.ref_type(index)?),
            Constant::MethodType { descriptor: desc } => {
                ConstantData::MethodType(descriptor(&self.utf8_string(desc.0 .0)?)?)
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                let member = if handle_kind.is_field() {
                    MemberRef::Field(self.field_ref(member.0)?)
                } else {
                    MemberRef::Method(self.method_ref(member.0)?)
                };
                ConstantData::MethodHandle(*handle_kind, member)
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                let (name, desc) = self.name_and_type(name_and_type.0 .0)?;
                ConstantData::Dynamic(DynamicConstant {
                    bootstrap_method: *bootstrap_method,
                    name: unqualified_name(name)?,
                    descriptor: descriptor(&desc)?,
                })
            }
            _ => return Err(wrong_kind(index, "loadable constant")),
        };
        Ok(constant)
    }

    pub fn get_ref_type(
        &mut self,
        ref_type: &RefType<BinaryName>,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        self.get_class(&ref_type.class_name()).map(|class| class.0)
    }

    pub fn get_field_ref(&mut self, field: &FieldRef) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(field.owner.as_str())?;
        let name_and_type =
            self.get_name_and_type(field.name.as_str(), &field.descriptor.render())?;
        self.get_or_insert(Constant::FieldRef(class, name_and_type))
    }

    pub fn get_method_ref(
        &mut self,
        method: &MethodRef,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(&method.owner.class_name())?;
        let name_and_type =
            self.get_name_and_type(method.name.as_str(), &method.descriptor.render())?;
        self.get_or_insert(Constant::MethodRef {
            class,
            name_and_type,
            is_interface: method.is_interface,
        })
    }

    pub fn get_invoke_dynamic(
        &mut self,
        invoke_dynamic: &InvokeDynamic,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let name_and_type = self.get_name_and_type(
            invoke_dynamic.name.as_str(),
            &invoke_dynamic.descriptor.render(),
        )?;
        self.get_or_insert(Constant::InvokeDynamic {
            bootstrap_method: invoke_dynamic.bootstrap_method,
            name_and_type,
        })
    }

    /// Get or insert the entry backing a loadable constant
    pub fn get_loadable(
        &mut self,
        constant: &ConstantData,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let constant = match constant {
            ConstantData::Integer(int) => Constant::Integer(*int),
            ConstantData::Float(bits) => Constant::Float(*bits),
            ConstantData::Long(long) => Constant::Long(*long),
            ConstantData::Double(bits) => Constant::Double(*bits),
            ConstantData::String(utf8) => Constant::String(self.get_modified_utf8(utf8.clone())?),
            ConstantData::Class(ref_type) => return self.get_ref_type(ref_type),
            ConstantData::MethodType(desc) => Constant::MethodType {
                descriptor: self.get_utf8(&desc.render())?,
            },
            ConstantData::MethodHandle(handle_kind, member) => {
                let member = match member {
                    MemberRef::Field(field) => self.get_field_ref(field)?,
                    MemberRef::Method(method) => self.get_method_ref(method)?,
                };
                Constant::MethodHandle {
                    handle_kind: *handle_kind,
                    member,
                }
            }
            ConstantData::Dynamic(dynamic) => Constant::Dynamic {
                bootstrap_method: dynamic.bootstrap_method,
                name_and_type: self
                    .get_name_and_type(dynamic.name.as_str(), &dynamic.descriptor.render())?,
            },
        };
        self.get_or_insert(constant)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_refs_resolve_symbolically() {
        let mut constants = ConstantsPool::new();
        let field = FieldRef {
            owner: BinaryName::from_string(String::from("a/B")).unwrap(),
            name: UnqualifiedName::from_string(String::from("flag")).unwrap(),
            descriptor: FieldType::boolean(),
        };
        let index = constants.get_field_ref(&field).unwrap();
        assert_eq!(constants.field_ref(index.0).unwrap(), field);

        // Inserting again reuses the entry
        let len = constants.len();
        assert_eq!(constants.get_field_ref(&field).unwrap(), index);
        assert_eq!(constants.len(), len);

        assert!(matches!(
            constants.method_ref(index.0),
            Err(MalformedKind::WrongConstantKind { .. })
        ));
    }

    #[test]
    fn array_class_constants() {
        let mut constants = ConstantsPool::new();
        let class = constants.get_class("[Ljava/lang/String;").unwrap();
        assert_eq!(
            constants.ref_type(class.0 .0).unwrap(),
            RefType::array(FieldType::object(BinaryName::STRING))
        );
        assert_eq!(
            constants.loadable(class.0 .0).unwrap(),
            ConstantData::Class(RefType::array(FieldType::object(BinaryName::STRING)))
        );
    }

    #[test]
    fn invalid_names_are_reported() {
        let mut constants = ConstantsPool::new();
        let class = constants.get_class("a/B").unwrap();
        let name_and_type = constants.get_name_and_type("x", "not a descriptor").unwrap();
        let field = constants
            .get_or_insert(Constant::FieldRef(class, name_and_type))
            .unwrap();
        assert!(matches!(
            constants.field_ref(field.0),
            Err(MalformedKind::InvalidDescriptor(_))
        ));

        let bad_class = constants.get_class("a//B").unwrap();
        assert!(matches!(
            constants.ref_type(bad_class.0 .0),
            Err(MalformedKind::InvalidName(_))
        ));
    }

    #[test]
    fn wide_dynamic_constants() {
        let dynamic = ConstantData::Dynamic(DynamicConstant {
            bootstrap_method: 0,
            name: UnqualifiedName::from_string(String::from("value")).unwrap(),
            descriptor: FieldType::long(),
        });
        assert_eq!(dynamic.width(), 2);
        assert_eq!(ConstantData::Integer(3).width(), 1);
    }
}
