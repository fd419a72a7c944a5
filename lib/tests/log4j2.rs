mod common;

use common::MethodEvent::*;
use common::*;
use hotpatch::jvm::class_file::Version;
use hotpatch::jvm::code::{
    BranchInstruction, FieldRef, Instruction, InvokeType, LabelGenerator, MethodRef,
    OrdComparison,
};
use hotpatch::jvm::verifier::VerificationType;
use hotpatch::jvm::{
    Error, MalformedKind, MethodAccessFlags, MethodDescriptor, ParseDescriptor, RefType,
};
use hotpatch::patch::{DisableLiteralPatternConverter, HotPatch, PatchRegistry};

const CONVERTER: &str = "org/apache/logging/log4j/core/pattern/LiteralPatternConverter";
const FORMAT_DESCRIPTOR: &str =
    "(Lorg/apache/logging/log4j/core/LogEvent;Ljava/lang/StringBuilder;)V";

fn substitute() -> Instruction {
    Instruction::GetField(field(CONVERTER, "substitute", "Z"))
}

fn literal() -> Instruction {
    Instruction::GetField(field(CONVERTER, "literal", "Ljava/lang/String;"))
}

fn method_ref(owner: &str, name: &str, descriptor: &str, is_interface: bool) -> MethodRef {
    MethodRef {
        owner: RefType::Object(binary_name(owner)),
        name: unqualified_name(name),
        descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        is_interface,
    }
}

/// `toAppendTo.append(substitute ? config.getStrSubstitutor().replace(event, literal) : literal)`
fn format_events(labels: &mut LabelGenerator) -> Vec<MethodEvent> {
    let (plain, append) = (labels.fresh_label(), labels.fresh_label());
    let config: FieldRef = field(
        CONVERTER,
        "config",
        "Lorg/apache/logging/log4j/core/config/Configuration;",
    );
    vec![
        Code,
        Insn(Instruction::ALoad(2)),
        Insn(Instruction::ALoad(0)),
        Insn(substitute()),
        Branch(BranchInstruction::If(OrdComparison::EQ, plain)),
        Insn(Instruction::ALoad(0)),
        Insn(Instruction::GetField(config)),
        Insn(Instruction::Invoke(
            InvokeType::Interface,
            method_ref(
                "org/apache/logging/log4j/core/config/Configuration",
                "getStrSubstitutor",
                "()Lorg/apache/logging/log4j/core/lookup/StrSubstitutor;",
                true,
            ),
        )),
        Insn(Instruction::ALoad(1)),
        Insn(Instruction::ALoad(0)),
        Insn(literal()),
        Insn(Instruction::Invoke(
            InvokeType::Virtual,
            method_ref(
                "org/apache/logging/log4j/core/lookup/StrSubstitutor",
                "replace",
                "(Lorg/apache/logging/log4j/core/LogEvent;Ljava/lang/String;)Ljava/lang/String;",
                false,
            ),
        )),
        Branch(BranchInstruction::Goto(append)),
        Label(plain),
        Insn(Instruction::ALoad(0)),
        Insn(literal()),
        Label(append),
        Insn(Instruction::Invoke(
            InvokeType::Virtual,
            method_ref(
                "java/lang/StringBuilder",
                "append",
                "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
                false,
            ),
        )),
        Insn(Instruction::Pop),
        Branch(BranchInstruction::Return),
    ]
}

/// `return substitute ? null : null;`, a method with the same pattern but a different name
fn to_string_events(labels: &mut LabelGenerator) -> Vec<MethodEvent> {
    let other = labels.fresh_label();
    vec![
        Code,
        Insn(Instruction::ALoad(0)),
        Insn(substitute()),
        Branch(BranchInstruction::If(OrdComparison::EQ, other)),
        Insn(Instruction::AConstNull),
        Branch(BranchInstruction::AReturn),
        Label(other),
        Insn(Instruction::AConstNull),
        Branch(BranchInstruction::AReturn),
    ]
}

fn converter_class(version: Version, format: Vec<MethodEvent>) -> Vec<u8> {
    ClassFixture::new(CONVERTER, version)
        .method(MethodAccessFlags::PUBLIC, "format", FORMAT_DESCRIPTOR, format)
        .method(
            MethodAccessFlags::PUBLIC,
            "toString",
            "()Ljava/lang/String;",
            to_string_events(&mut LabelGenerator::new()),
        )
        .write()
        .unwrap()
}

fn patch(bytes: &[u8]) -> Vec<u8> {
    init_logging();
    PatchRegistry::with_default_patches()
        .transform(CONVERTER, bytes)
        .unwrap()
        .expect("the converter is a patch target")
}

#[test]
fn ifeq_on_substitute_becomes_unconditional() {
    let bytes = converter_class(Version::JAVA8, format_events(&mut LabelGenerator::new()));
    let patched = patch(&bytes);
    let recorder = record(&patched);

    // The substitution branch is unreachable now, and collapses into a single `athrow`
    let branches = recorder.branches("format");
    assert_eq!(branches.len(), 4);
    let plain = match &branches[0] {
        BranchInstruction::If(OrdComparison::EQ, plain) => *plain,
        other => panic!("expected an ifeq, got {:?}", other),
    };
    assert_eq!(branches[1], BranchInstruction::Goto(plain));
    assert_eq!(branches[2], BranchInstruction::AThrow);
    assert_eq!(branches[3], BranchInstruction::Return);

    let frames = recorder.frames("format");
    assert!(frames.iter().any(|frame| frame.stack
        == vec![VerificationType::Object(RefType::Object(binary_name(
            "java/lang/StringBuilder"
        )))]));

    // Other methods are passed through untouched
    assert_eq!(
        recorder.branches("toString"),
        record(&bytes).branches("toString")
    );
}

#[test]
fn every_occurrence_in_format_is_rewritten() {
    let mut labels = LabelGenerator::new();
    let (first, second) = (labels.fresh_label(), labels.fresh_label());
    let format = vec![
        Code,
        Insn(Instruction::ALoad(0)),
        Insn(substitute()),
        Branch(BranchInstruction::If(OrdComparison::EQ, first)),
        Label(first),
        Insn(Instruction::ALoad(0)),
        Insn(substitute()),
        Branch(BranchInstruction::If(OrdComparison::EQ, second)),
        Label(second),
        Branch(BranchInstruction::Return),
    ];
    let patched = patch(&converter_class(Version::JAVA8, format));

    let branches = record(&patched).branches("format");
    assert_eq!(branches.len(), 5);
    assert!(matches!(
        branches[0],
        BranchInstruction::If(OrdComparison::EQ, _)
    ));
    assert!(matches!(branches[1], BranchInstruction::Goto(_)));
    assert!(matches!(
        branches[2],
        BranchInstruction::If(OrdComparison::EQ, _)
    ));
    assert!(matches!(branches[3], BranchInstruction::Goto(_)));
}

#[test]
fn old_classes_keep_unreachable_code() {
    let bytes = converter_class(Version::JAVA5, format_events(&mut LabelGenerator::new()));
    let branches = record(&patch(&bytes)).branches("format");
    assert_eq!(branches.len(), 4);
    let plain = match &branches[0] {
        BranchInstruction::If(OrdComparison::EQ, plain) => *plain,
        other => panic!("expected an ifeq, got {:?}", other),
    };
    assert_eq!(branches[1], BranchInstruction::Goto(plain));
    assert!(matches!(branches[2], BranchInstruction::Goto(append) if append != plain));
    assert_eq!(branches[3], BranchInstruction::Return);
}

#[test]
fn patched_classes_stay_valid() {
    let bytes = converter_class(Version::JAVA8, format_events(&mut LabelGenerator::new()));
    let patched = patch(&bytes);
    let rewritten = rewrite(&patched);
    assert_eq!(record(&rewritten).methods, record(&patched).methods);

    // The `goto` from the first pass becomes unreachable and folds into the existing `athrow`
    let twice = patch(&patched);
    assert_eq!(
        record(&twice).branches("format"),
        record(&patched).branches("format")
    );
}

#[test]
fn classes_without_the_pattern_are_unchanged() {
    let format = vec![
        Code,
        Insn(Instruction::ALoad(0)),
        Insn(Instruction::GetField(field(CONVERTER, "substitute", "I"))),
        Insn(Instruction::Pop),
        Branch(BranchInstruction::Return),
    ];
    let bytes = converter_class(Version::JAVA8, format);
    let patched = DisableLiteralPatternConverter.apply(&bytes).unwrap();
    assert_eq!(record(&patched).methods, record(&bytes).methods);
}

#[test]
fn other_classes_are_skipped() {
    let registry = PatchRegistry::with_default_patches();
    assert!(registry
        .transform("org/apache/logging/log4j/core/pattern/LevelPatternConverter", &[])
        .unwrap()
        .is_none());
}

#[test]
fn malformed_input_fails_closed() {
    let registry = PatchRegistry::with_default_patches();
    assert!(matches!(
        registry.transform(CONVERTER, b"definitely not a class"),
        Err(Error::MalformedInput(MalformedKind::BadMagic(_)))
    ));
}
