//! Stack map frame inference
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`Frame`]) and the set of stack map frames for all possible jump
//! targets in a method is the _stack map table_.
//!
//! Rewriting a method invalidates its stack map table, so the frames get inferred again from
//! scratch (see [`analyze`]). Starting from the frame implied by the method descriptor, frames are
//! pushed through each instruction and merged wherever control flow joins. This is a fix-point
//! algorithm which converges because merging only ever makes types more general. The "types" used
//! (represented using [`VerificationType`]) are slightly augmented to take into account
//! initialization and null.
//!
//! Unlike the JVM's own [verification by type-checking][0], operand types are not checked: the
//! input class was already accepted by a compiler, so only the information needed to write
//! frames is tracked.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod analysis;
mod frame;
mod types;

pub use analysis::*;
pub use frame::*;
pub use types::*;
