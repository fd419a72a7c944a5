//! Raw structure of a class file
//!
//! Everything here refers to other parts of the class through constant pool indices. Turning
//! those into names, types, and instructions is the job of the class reader.

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod parse;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use parse::*;
pub use serialize::*;
pub use version::*;
