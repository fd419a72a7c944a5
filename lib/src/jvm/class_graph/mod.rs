//! Class hierarchy, as far as frame computation needs it
//!
//! Merging two object types in a frame requires knowing their superclasses. The graph only holds
//! the classes it has been told about: the common `java.*` types it is seeded with, plus whatever
//! classes the writer registers while transforming.

use super::{BinaryName, Name};
use elsa::map::FrozenMap;
use std::fmt;

mod java_classes;

pub use java_classes::*;

/// Hierarchy information about one class or interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassData {
    pub name: BinaryName,

    /// Only `java/lang/Object` (and interfaces in some old class files) have no superclass
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
    pub is_interface: bool,
}

/// Tracks the relationships between classes and interfaces
///
/// Classes are only ever added, never removed or modified. This means classes can be registered
/// through a shared reference while references to other classes are still being held.
pub struct ClassGraph {
    classes: FrozenMap<BinaryName, Box<ClassData>>,
}

impl Default for ClassGraph {
    fn default() -> Self {
        ClassGraph::new()
    }
}

impl fmt::Debug for ClassGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassGraph").finish_non_exhaustive()
    }
}

impl ClassGraph {
    /// New empty graph
    pub fn new() -> Self {
        ClassGraph {
            classes: FrozenMap::new(),
        }
    }

    /// New graph containing the standard library types most often found in frames
    pub fn with_java_library_types() -> Self {
        let graph = ClassGraph::new();
        add_java_classes(&graph);
        graph
    }

    /// Add a class to the graph
    ///
    /// If a class by the same name is already present, the existing entry wins.
    pub fn add_class(&self, data: ClassData) -> &ClassData {
        self.classes.insert(data.name.clone(), Box::new(data))
    }

    pub fn get(&self, name: &str) -> Option<&ClassData> {
        self.classes.get(name)
    }

    /// Is the class known to be an interface?
    ///
    /// Returns `None` for classes missing from the graph.
    pub fn is_interface(&self, name: &str) -> Option<bool> {
        self.get(name).map(|class| class.is_interface)
    }

    /// Chain of superclasses, starting with the class itself
    ///
    /// The chain stops early at the first class missing from the graph.
    fn superclass_chain<'a>(&'a self, name: &'a BinaryName) -> Vec<&'a BinaryName> {
        let mut chain = vec![name];
        let mut current = self.get(name.as_str());
        while let Some(class) = current {
            match &class.superclass {
                Some(superclass) if !chain.contains(&superclass) => {
                    chain.push(superclass);
                    current = self.get(superclass.as_str());
                }
                _ => break,
            }
        }
        chain
    }

    /// Most specific class that both classes extend
    ///
    /// This follows what the JVM verifier does for interfaces: any merge involving an interface
    /// produces `java/lang/Object`. The same fallback is used when the graph doesn't know enough
    /// about the classes to find a common superclass.
    pub fn common_superclass(&self, class1: &BinaryName, class2: &BinaryName) -> BinaryName {
        if class1 == class2 {
            return class1.clone();
        }
        if self.is_interface(class1.as_str()) == Some(true)
            || self.is_interface(class2.as_str()) == Some(true)
        {
            return BinaryName::OBJECT;
        }

        let chain2 = self.superclass_chain(class2);
        self.superclass_chain(class1)
            .into_iter()
            .find(|class| chain2.contains(class))
            .cloned()
            .unwrap_or(BinaryName::OBJECT)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    fn class(graph: &ClassGraph, class_name: &str, superclass: &str) {
        graph.add_class(ClassData {
            name: name(class_name),
            superclass: Some(name(superclass)),
            interfaces: vec![],
            is_interface: false,
        });
    }

    #[test]
    fn common_superclass_of_exceptions() {
        let graph = ClassGraph::with_java_library_types();
        assert_eq!(
            graph.common_superclass(
                &name("java/lang/IllegalArgumentException"),
                &name("java/lang/IllegalStateException")
            ),
            BinaryName::RUNTIMEEXCEPTION
        );
        assert_eq!(
            graph.common_superclass(&name("java/lang/Error"), &BinaryName::EXCEPTION),
            BinaryName::THROWABLE
        );
        assert_eq!(
            graph.common_superclass(&BinaryName::STRING, &BinaryName::STRING),
            BinaryName::STRING
        );
    }

    #[test]
    fn interfaces_and_unknown_classes_merge_to_object() {
        let graph = ClassGraph::with_java_library_types();
        assert_eq!(graph.is_interface("java/lang/CharSequence"), Some(true));
        assert_eq!(
            graph.common_superclass(&BinaryName::STRING, &BinaryName::CHARSEQUENCE),
            BinaryName::OBJECT
        );
        assert_eq!(
            graph.common_superclass(&name("a/Unknown"), &BinaryName::STRING),
            BinaryName::OBJECT
        );
    }

    #[test]
    fn registered_classes_extend_partial_chains() {
        let graph = ClassGraph::new();
        class(&graph, "p/Base", "p/Missing");
        class(&graph, "p/Left", "p/Base");
        class(&graph, "p/Right", "p/Base");
        assert_eq!(
            graph.common_superclass(&name("p/Left"), &name("p/Right")),
            name("p/Base")
        );

        // First registration wins
        class(&graph, "p/Left", "java/lang/Object");
        assert_eq!(
            graph.get("p/Left").and_then(|c| c.superclass.clone()),
            Some(name("p/Base"))
        );
    }
}
