use super::class_file::{Constant, Version};
use super::code::Label;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub enum Error {
    /// Input bytes do not parse as a class file
    MalformedInput(MalformedKind),

    /// No consistent stack map frames exist for a method
    VerificationImpossible {
        method: String,

        /// Index of the offending instruction in the method body
        instruction: usize,
        kind: VerifierErrorKind,
    },

    ConstantPoolOverflow(ConstantPoolOverflow),
    MethodCodeOverflow {
        method: String,
        code_length: usize,
    },
    MethodCodeMaxStackOverflow {
        method: String,
        max_stack: usize,
    },
    MethodCodeMaxLocalsOverflow {
        method: String,
        max_locals: usize,
    },

    /// An instruction or table refers to a label that was never placed
    UnplacedLabel(Label),

    /// A label was placed twice in the same method
    DuplicateLabel(Label),

    /// The writer was asked for bytes before it saw a class header
    MissingClassHeader,

    IoError(std::io::Error),
}

/// Reasons a class file fails to parse
#[derive(Debug)]
pub enum MalformedKind {
    BadMagic(u32),
    UnsupportedVersion(Version),
    Truncated { offset: usize },
    TrailingBytes { offset: usize },
    UnknownConstantTag { index: u16, tag: u8 },
    BadConstantIndex(u16),
    WrongConstantKind { index: u16, expected: &'static str },
    InvalidModifiedUtf8(u16),
    InvalidName(String),
    InvalidDescriptor(String),
    InvalidHandleKind(u8),
    DuplicateCode,
    AttributeLength { name: String },
    InvalidOpcode { offset: usize, opcode: u8 },
    InvalidWideOpcode { offset: usize, opcode: u8 },
    InvalidBranchTarget { offset: usize, target: isize },
    InvalidCodeOffset(usize),
    InvalidFrame { offset: usize },
    EmptyCode,
}

#[derive(Debug)]
pub enum VerifierErrorKind {
    /// Popped from an empty stack
    EmptyStack,

    /// Stack shape does not match what the instruction expects (eg. `dup` of a `long`)
    InvalidWidth(usize),

    /// Read of a local variable that holds no usable value
    InvalidLocal(u16),

    /// `aaload` on something that is not an array of references
    NotArrayType,

    /// Two paths reach the same instruction with different stack depths
    IncompatibleStackHeights(usize, usize),

    /// Two paths reach the same instruction with irreconcilable stack entries
    IncompatibleTypes(String, String),

    /// The last instruction of the method can fall through
    FallsOffEnd,

    /// `jsr`/`ret` can not be described with stack map frames
    Subroutine,

    /// `<init>` called on something that is not an uninitialized reference
    InvalidConstructorCall,
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

impl From<ConstantPoolOverflow> for Error {
    fn from(err: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow(err)
    }
}

impl From<MalformedKind> for Error {
    fn from(kind: MalformedKind) -> Error {
        Error::MalformedInput(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::MalformedInput(kind) => write!(f, "malformed class file: {:?}", kind),
            Error::VerificationImpossible {
                method,
                instruction,
                kind,
            } => write!(
                f,
                "cannot compute frames for {} (instruction #{}): {:?}",
                method, instruction, kind
            ),
            Error::ConstantPoolOverflow(overflow) => write!(
                f,
                "constant pool is full (adding {:?} at #{})",
                overflow.constant, overflow.offset
            ),
            Error::MethodCodeOverflow {
                method,
                code_length,
            } => write!(f, "code of {} is too long ({} bytes)", method, code_length),
            Error::MethodCodeMaxStackOverflow { method, max_stack } => {
                write!(f, "max stack of {} is too large ({})", method, max_stack)
            }
            Error::MethodCodeMaxLocalsOverflow { method, max_locals } => {
                write!(f, "max locals of {} is too large ({})", method, max_locals)
            }
            Error::UnplacedLabel(label) => write!(f, "label {:?} was never placed", label),
            Error::DuplicateLabel(label) => write!(f, "label {:?} was placed twice", label),
            Error::MissingClassHeader => f.write_str("class header was never visited"),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
