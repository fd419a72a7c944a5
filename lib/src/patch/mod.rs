//! Hot patches and the registry dispatching classes to them
//!
//! A patch decides from the class name alone whether it applies, then rewrites the complete class
//! file. Patches are pure: the same input always produces the same output, and a failed patch
//! never produces partial bytes.

use crate::jvm::Error;
use log::debug;

mod log4j2;

pub use log4j2::*;

/// Rewrite of one specific class
pub trait HotPatch: Send + Sync {
    /// Stable identifier, used in logs and to order patches
    fn name(&self) -> &'static str;

    /// Does the patch apply to the class by this name?
    ///
    /// Names are accepted in either the dotted or the slash-separated form.
    fn is_target_class(&self, class_name: &str) -> bool;

    /// Rewrite the class, returning the complete new class file
    fn apply(&self, class_bytes: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Set of patches, kept ordered by name
#[derive(Default)]
pub struct PatchRegistry {
    patches: Vec<Box<dyn HotPatch>>,
}

impl PatchRegistry {
    /// Empty registry
    pub fn new() -> PatchRegistry {
        PatchRegistry::default()
    }

    /// Registry with every built-in patch
    pub fn with_default_patches() -> PatchRegistry {
        let mut registry = PatchRegistry::new();
        registry.register(Box::new(DisableLiteralPatternConverter));
        registry
    }

    pub fn register(&mut self, patch: Box<dyn HotPatch>) {
        let position = self
            .patches
            .partition_point(|registered| registered.name() <= patch.name());
        self.patches.insert(position, patch);
    }

    /// Names of the registered patches, in the order they get applied
    pub fn names(&self) -> Vec<&'static str> {
        self.patches.iter().map(|patch| patch.name()).collect()
    }

    /// Run every patch targeting the class, each one on the output of the previous one
    ///
    /// Returns `None` if no patch targets the class. The first failure aborts the whole
    /// transformation.
    pub fn transform(
        &self,
        class_name: &str,
        class_bytes: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        let mut transformed: Option<Vec<u8>> = None;
        for patch in &self.patches {
            if !patch.is_target_class(class_name) {
                continue;
            }
            debug!("applying {} to {}", patch.name(), class_name);
            let input = transformed.as_deref().unwrap_or(class_bytes);
            transformed = Some(patch.apply(input)?);
        }
        Ok(transformed)
    }
}
