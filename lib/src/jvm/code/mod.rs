//! Bytecode representation, decoding, and encoding
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. We split up the [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may branch
//!
//! Branch targets are symbolic [`Label`]s while a method body is being visited, so that
//! instructions can be inserted or removed without worrying about offsets.
//!
//! ### Code generation
//!
//! Rewriting a method body invalidates a lot of derived information: jump offsets, the maximum
//! stack size, and the stack map table. [`MethodCode`] collects a method body and recomputes all
//! of that when the body gets assembled back into a `Code` attribute.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod decode;
mod encode;
mod instructions;
pub mod jump_encoding;
mod label;
mod method_code;
mod operands;

pub use decode::*;
pub use encode::*;
pub use instructions::*;
pub use label::*;
pub use method_code::*;
pub use operands::*;
