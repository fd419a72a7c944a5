//! Read, transform, and write JVM classes
//!
//! ### Pipeline
//!
//! Transforming a class takes three pieces:
//!
//!   - a [`ClassReader`], which parses the class bytes and replays them as visitor events
//!   - a chain of [`ClassVisitor`]s (and the [`MethodVisitor`]s they hand out for each method),
//!     which can drop, rewrite, or insert events on their way through
//!   - a [`ClassWriter`] at the end of the chain, which turns the events back into bytes
//!
//! Instructions in method bodies are symbolic: jump targets are [`code::Label`]s and constant
//! pool references are resolved into names and descriptors. The writer puts the constants back
//! into the pool, picks jump encodings, and recomputes max stack, max locals, and the stack map
//! table (see [`verifier`]).
//!
//! ### Example
//!
//! Copying a class through the pipeline without modifying it:
//!
//! ```no_run
//! use hotpatch::jvm::class_graph::ClassGraph;
//! use hotpatch::jvm::{ClassReader, ClassWriter, Error};
//!
//! # fn copy_class(bytes: &[u8]) -> Result<Vec<u8>, Error> {
//! let reader = ClassReader::new(bytes)?;
//! let graph = ClassGraph::with_java_library_types();
//! let mut writer = ClassWriter::from_reader(&reader, &graph);
//! reader.accept(&mut writer)?;
//! writer.into_bytes()
//! # }
//! ```

mod access_flags;
pub mod class_file;
pub mod class_graph;
mod class_reader;
mod class_writer;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;
pub mod visitor;

pub use access_flags::*;
pub use class_reader::*;
pub use class_writer::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
pub use visitor::{ClassVisitor, MethodVisitor};
