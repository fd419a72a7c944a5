//! Rewrite compiled JVM classes to neutralize known-vulnerable code paths.
//!
//! The crate is split into two layers:
//!
//!   - [`jvm`] is a small class file engine: a [`jvm::ClassReader`] that turns class bytes into a
//!     stream of visitor events, the [`jvm::ClassVisitor`]/[`jvm::MethodVisitor`] traits that let
//!     transformations wrap each other, and a [`jvm::ClassWriter`] that turns events back into
//!     class bytes (recomputing max stack, max locals, and stack map frames).
//!
//!   - [`patch`] contains the actual hot patches, each implementing [`patch::HotPatch`], and a
//!     [`patch::PatchRegistry`] for dispatching classes to them.
//!
//! ### Example
//!
//! ```no_run
//! use hotpatch::patch::PatchRegistry;
//!
//! # fn run(class_bytes: Vec<u8>) -> Result<(), hotpatch::jvm::Error> {
//! let registry = PatchRegistry::with_default_patches();
//! let class_name = "org/apache/logging/log4j/core/pattern/LiteralPatternConverter";
//! if let Some(patched) = registry.transform(class_name, &class_bytes)? {
//!     std::fs::write("LiteralPatternConverter.class", patched).map_err(hotpatch::jvm::Error::IoError)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod jvm;
pub mod patch;
mod util;
