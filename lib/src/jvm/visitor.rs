//! Event-based traversal of classes
//!
//! A [`super::ClassReader`] walks over a class file and reports what it finds to a
//! [`ClassVisitor`]. Visitors are meant to be chained: each one either handles an event itself or
//! passes it on to the visitor returned by `delegate`, usually ending in a
//! [`super::ClassWriter`]. All event methods default to forwarding to the delegate (or doing
//! nothing when there is none), so a transformation only overrides the events it cares about.
//!
//! Events for a method body arrive in code order. Before each instruction come the labels placed
//! at its offset, the original stack map frame for that offset (if any), and the line numbers
//! starting there.

use super::class_file::Version;
use super::code::{BranchInstruction, Instruction, Label, LocalVariable, TryCatchBlock};
use super::verifier::Frame;
use super::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, RefType, UnqualifiedName,
};

/// Everything about a class that comes before its members
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassHeader {
    pub version: Version,
    pub access_flags: ClassAccessFlags,
    pub name: BinaryName,

    /// Only `java/lang/Object` has no superclass
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldHeader {
    pub access_flags: FieldAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub attributes: Vec<RawAttribute>,
}

/// Method declaration
///
/// The `Code` attribute is never in `attributes`: the body gets visited separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodHeader {
    pub access_flags: MethodAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub attributes: Vec<RawAttribute>,
}

impl MethodHeader {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }
}

/// Attribute passed through as uninterpreted bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub info: Vec<u8>,
}

/// Stack map frame at some offset of the original code
///
/// Locals are listed one entry per value, like in a `StackMapTable` (so a `long` occupies a
/// single entry).
pub type FrameHint = Frame<RefType<BinaryName>, Label>;

pub trait ClassVisitor {
    /// Visitor receiving the events that are not overridden
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        None
    }

    fn visit_header(&mut self, header: &ClassHeader) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_header(header),
            None => Ok(()),
        }
    }

    fn visit_field(&mut self, field: &FieldHeader) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_field(field),
            None => Ok(()),
        }
    }

    /// Start visiting a method
    ///
    /// Returning `None` means the method body is not of interest (so the reader skips it).
    fn visit_method<'a>(
        &'a mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodVisitor + 'a>>, Error> {
        match self.delegate() {
            Some(next) => next.visit_method(method),
            None => Ok(None),
        }
    }

    /// Class-level attribute
    fn visit_attribute(&mut self, attribute: &RawAttribute) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_attribute(attribute),
            None => Ok(()),
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_end(),
            None => Ok(()),
        }
    }
}

pub trait MethodVisitor {
    /// Visitor receiving the events that are not overridden
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        None
    }

    /// The method has a body, the events for which follow
    fn visit_code(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_code(),
            None => Ok(()),
        }
    }

    fn visit_try_catch_block(&mut self, block: &TryCatchBlock) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_try_catch_block(block),
            None => Ok(()),
        }
    }

    /// Place a label at the current position in the code
    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_label(label),
            None => Ok(()),
        }
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_line_number(line, start),
            None => Ok(()),
        }
    }

    fn visit_frame(&mut self, frame: &FrameHint) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_frame(frame),
            None => Ok(()),
        }
    }

    fn visit_instruction(&mut self, instruction: &Instruction) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_instruction(instruction),
            None => Ok(()),
        }
    }

    fn visit_branch_instruction(
        &mut self,
        instruction: &BranchInstruction<Label>,
    ) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_branch_instruction(instruction),
            None => Ok(()),
        }
    }

    fn visit_local_variable(&mut self, local_variable: &LocalVariable) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_local_variable(local_variable),
            None => Ok(()),
        }
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        match self.delegate() {
            Some(next) => next.visit_end(),
            None => Ok(()),
        }
    }
}
