use super::{BinaryName, ClassData, ClassGraph};

/// `(name, superclass, interfaces, is_interface)` for the seeded classes
///
/// Superclasses are listed before their subclasses.
const JAVA_CLASSES: &[(&str, Option<&str>, &[&str], bool)] = &[
    ("java/lang/Object", None, &[], false),
    ("java/io/Serializable", Some("java/lang/Object"), &[], true),
    ("java/lang/Cloneable", Some("java/lang/Object"), &[], true),
    ("java/lang/Comparable", Some("java/lang/Object"), &[], true),
    ("java/lang/CharSequence", Some("java/lang/Object"), &[], true),
    ("java/lang/Appendable", Some("java/lang/Object"), &[], true),
    ("java/lang/Iterable", Some("java/lang/Object"), &[], true),
    ("java/lang/Runnable", Some("java/lang/Object"), &[], true),
    ("java/lang/AutoCloseable", Some("java/lang/Object"), &[], true),
    ("java/util/Collection", Some("java/lang/Object"), &["java/lang/Iterable"], true),
    ("java/util/List", Some("java/lang/Object"), &["java/util/Collection"], true),
    ("java/util/Map", Some("java/lang/Object"), &[], true),
    (
        "java/lang/String",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable", "java/lang/CharSequence"],
        false,
    ),
    (
        "java/lang/AbstractStringBuilder",
        Some("java/lang/Object"),
        &["java/lang/Appendable", "java/lang/CharSequence"],
        false,
    ),
    (
        "java/lang/StringBuilder",
        Some("java/lang/AbstractStringBuilder"),
        &["java/io/Serializable", "java/lang/CharSequence"],
        false,
    ),
    (
        "java/lang/StringBuffer",
        Some("java/lang/AbstractStringBuilder"),
        &["java/io/Serializable", "java/lang/CharSequence"],
        false,
    ),
    ("java/lang/Class", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Number", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Integer", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Long", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Float", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Double", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Short", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Byte", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    (
        "java/lang/Boolean",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Character",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    ("java/lang/invoke/MethodType", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/invoke/MethodHandle", Some("java/lang/Object"), &[], false),
    ("java/lang/Throwable", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Error", Some("java/lang/Throwable"), &[], false),
    ("java/lang/AssertionError", Some("java/lang/Error"), &[], false),
    ("java/lang/LinkageError", Some("java/lang/Error"), &[], false),
    ("java/lang/Exception", Some("java/lang/Throwable"), &[], false),
    ("java/lang/InterruptedException", Some("java/lang/Exception"), &[], false),
    ("java/lang/ReflectiveOperationException", Some("java/lang/Exception"), &[], false),
    (
        "java/lang/ClassNotFoundException",
        Some("java/lang/ReflectiveOperationException"),
        &[],
        false,
    ),
    ("java/io/IOException", Some("java/lang/Exception"), &[], false),
    ("java/lang/RuntimeException", Some("java/lang/Exception"), &[], false),
    ("java/lang/ArithmeticException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/ClassCastException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/IllegalArgumentException", Some("java/lang/RuntimeException"), &[], false),
    (
        "java/lang/NumberFormatException",
        Some("java/lang/IllegalArgumentException"),
        &[],
        false,
    ),
    ("java/lang/IllegalStateException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/IndexOutOfBoundsException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/NullPointerException", Some("java/lang/RuntimeException"), &[], false),
    (
        "java/lang/UnsupportedOperationException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    ("java/lang/SecurityException", Some("java/lang/RuntimeException"), &[], false),
];

fn name(name: &'static str) -> BinaryName {
    BinaryName::from_static(name)
}

/// Add the standard library classes to the graph
pub fn add_java_classes(graph: &ClassGraph) {
    for (class, superclass, interfaces, is_interface) in JAVA_CLASSES {
        graph.add_class(ClassData {
            name: name(class),
            superclass: superclass.map(name),
            interfaces: interfaces.iter().copied().map(name).collect(),
            is_interface: *is_interface,
        });
    }
}
