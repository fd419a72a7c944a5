mod common;

use common::*;
use hotpatch::jvm::class_file::Version;
use hotpatch::jvm::code::{
    BranchInstruction, Instruction, InvokeType, LabelGenerator, MethodRef, OrdComparison,
    TryCatchBlock,
};
use hotpatch::jvm::verifier::VerificationType;
use hotpatch::jvm::{
    BinaryName, ClassReader, Error, MalformedKind, MethodAccessFlags, MethodDescriptor, RefType,
    VerifierErrorKind,
};

use common::MethodEvent::*;

/// `static long sum(int n) { long total = 0; for (int i = 0; i < n; i++) total += i; return total; }`
fn sum_method(labels: &mut LabelGenerator) -> Vec<MethodEvent> {
    let (head, end) = (labels.fresh_label(), labels.fresh_label());
    vec![
        Code,
        Insn(Instruction::LConst0),
        Insn(Instruction::LStore(1)),
        Insn(Instruction::IConst0),
        Insn(Instruction::IStore(3)),
        Label(head),
        Insn(Instruction::ILoad(3)),
        Insn(Instruction::ILoad(0)),
        Branch(BranchInstruction::IfICmp(OrdComparison::GE, end)),
        Insn(Instruction::LLoad(1)),
        Insn(Instruction::ILoad(3)),
        Insn(Instruction::I2L),
        Insn(Instruction::LAdd),
        Insn(Instruction::LStore(1)),
        Insn(Instruction::IInc(3, 1)),
        Branch(BranchInstruction::Goto(head)),
        Label(end),
        Insn(Instruction::LLoad(1)),
        Branch(BranchInstruction::LReturn),
    ]
}

fn sum_class(version: Version) -> Vec<u8> {
    ClassFixture::new("me/Sums", version)
        .method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "sum",
            "(I)J",
            sum_method(&mut LabelGenerator::new()),
        )
        .write()
        .unwrap()
}

#[test]
fn loop_gets_max_values_and_frames() {
    let bytes = sum_class(Version::JAVA8);

    let code = code_of(&bytes, "sum");
    assert_eq!(code.max_stack, 4);
    assert_eq!(code.max_locals, 4);
    assert_eq!(code_attribute_names(&bytes, &code), vec!["StackMapTable"]);

    let frames = record(&bytes).frames("sum");
    let loop_locals = vec![
        VerificationType::Integer,
        VerificationType::Long,
        VerificationType::Integer,
    ];
    assert_eq!(frames.len(), 2);
    for frame in frames {
        assert_eq!(frame.locals, loop_locals);
        assert!(frame.stack.is_empty());
    }
}

#[test]
fn events_survive_a_round_trip() {
    let bytes = sum_class(Version::JAVA8);
    let recorder = record(&bytes);
    let header = recorder.header.as_ref().unwrap();
    assert_eq!(header.name.to_string(), "me/Sums");
    assert_eq!(header.superclass, Some(BinaryName::OBJECT));

    let instructions: Vec<&MethodEvent> = recorder
        .method("sum")
        .iter()
        .filter(|event| matches!(event, Insn(_) | Branch(_)))
        .collect();
    let expected = sum_method(&mut LabelGenerator::new());
    let expected: Vec<&MethodEvent> = expected
        .iter()
        .filter(|event| matches!(event, Insn(_) | Branch(_)))
        .collect();
    assert_eq!(instructions.len(), expected.len());
    for (read, written) in instructions.iter().zip(&expected) {
        match (read, written) {
            (Insn(read), Insn(written)) => assert_eq!(read, written),
            (Branch(read), Branch(written)) => {
                assert_eq!(
                    std::mem::discriminant(read),
                    std::mem::discriminant(written)
                )
            }
            other => panic!("mismatched events {:?}", other),
        }
    }
}

#[test]
fn rewriting_is_stable() {
    let bytes = sum_class(Version::JAVA8);
    let once = rewrite(&bytes);
    let twice = rewrite(&once);
    assert_eq!(once, bytes);
    assert_eq!(twice, once);
}

#[test]
fn old_classes_get_no_frames() {
    let bytes = sum_class(Version::JAVA5);
    let code = code_of(&bytes, "sum");
    assert_eq!(code.max_stack, 4);
    assert!(code_attribute_names(&bytes, &code).is_empty());
    assert!(record(&bytes).frames("sum").is_empty());
}

/// `void run() { try { work(); } catch (IOException e) { e.printStackTrace(); } }`
#[test]
fn exception_handlers_and_debug_info() {
    let mut labels = LabelGenerator::new();
    let (start, end, handler, exit, last) = (
        labels.fresh_label(),
        labels.fresh_label(),
        labels.fresh_label(),
        labels.fresh_label(),
        labels.fresh_label(),
    );
    let io_exception = binary_name("java/io/IOException");
    let work = MethodRef {
        owner: RefType::Object(binary_name("me/Worker")),
        name: unqualified_name("work"),
        descriptor: MethodDescriptor {
            parameters: vec![],
            return_type: None,
        },
        is_interface: false,
    };
    let print_stack_trace = MethodRef {
        owner: RefType::Object(BinaryName::THROWABLE),
        name: unqualified_name("printStackTrace"),
        descriptor: MethodDescriptor {
            parameters: vec![],
            return_type: None,
        },
        is_interface: false,
    };
    let this_variable = hotpatch::jvm::code::LocalVariable {
        name: String::from("this"),
        descriptor: String::from("Lme/Worker;"),
        signature: None,
        start,
        end: last,
        index: 0,
    };

    let events = vec![
        Code,
        TryCatch(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: Some(io_exception.clone()),
        }),
        Label(start),
        LineNumber(10, start),
        Insn(Instruction::ALoad(0)),
        Insn(Instruction::Invoke(InvokeType::Virtual, work)),
        Label(end),
        Branch(BranchInstruction::Goto(exit)),
        Label(handler),
        LineNumber(11, handler),
        Insn(Instruction::AStore(1)),
        Insn(Instruction::ALoad(1)),
        Insn(Instruction::Invoke(InvokeType::Virtual, print_stack_trace)),
        Label(exit),
        Branch(BranchInstruction::Return),
        Label(last),
        LocalVariable(this_variable),
    ];
    let bytes = ClassFixture::new("me/Worker", Version::JAVA8)
        .method(MethodAccessFlags::PUBLIC, "run", "()V", events)
        .write()
        .unwrap();

    let code = code_of(&bytes, "run");
    assert_eq!(code.max_stack, 1);
    assert_eq!(code.max_locals, 2);
    assert_eq!(code.exception_table.len(), 1);
    assert_eq!(
        code_attribute_names(&bytes, &code),
        vec!["StackMapTable", "LineNumberTable", "LocalVariableTable"]
    );

    let recorder = record(&bytes);
    let events = recorder.method("run");
    let blocks: Vec<&TryCatchBlock> = events
        .iter()
        .filter_map(|event| match event {
            TryCatch(block) => Some(block),
            _ => None,
        })
        .collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].catch_type, Some(io_exception.clone()));

    let lines: Vec<u16> = events
        .iter()
        .filter_map(|event| match event {
            LineNumber(line, _) => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec![10, 11]);

    let variables: Vec<&hotpatch::jvm::code::LocalVariable> = events
        .iter()
        .filter_map(|event| match event {
            LocalVariable(variable) => Some(variable),
            _ => None,
        })
        .collect();
    assert_eq!(variables.len(), 1);
    assert_eq!(variables[0].name, "this");
    assert_eq!(variables[0].descriptor, "Lme/Worker;");

    // Handler entry, then the join after the handler
    let frames = recorder.frames("run");
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[0].stack,
        vec![VerificationType::Object(RefType::Object(io_exception))]
    );
    assert_eq!(
        frames[1].locals,
        vec![VerificationType::Object(RefType::Object(binary_name(
            "me/Worker"
        )))]
    );
    assert!(frames[1].stack.is_empty());
}

#[test]
fn long_forward_jumps_get_widened() {
    let mut labels = LabelGenerator::new();
    let end = labels.fresh_label();
    let mut events = vec![
        Code,
        Insn(Instruction::IConst0),
        Insn(Instruction::IStore(1)),
        Insn(Instruction::ILoad(0)),
        Branch(BranchInstruction::If(OrdComparison::EQ, end)),
    ];
    // `iinc 1 1` is 3 bytes, so this pushes `end` past the reach of a 16-bit offset
    events.extend((0..11_000).map(|_| Insn(Instruction::IInc(1, 1))));
    events.push(Label(end));
    events.push(Branch(BranchInstruction::Return));

    let bytes = ClassFixture::new("me/Big", Version::JAVA8)
        .method(MethodAccessFlags::STATIC, "big", "(I)V", events)
        .write()
        .unwrap();

    let branches = record(&bytes).branches("big");
    assert_eq!(branches.len(), 3);
    let end = match &branches[1] {
        BranchInstruction::Goto(end) => *end,
        other => panic!("expected a goto, got {:?}", other),
    };
    assert!(matches!(
        branches[0],
        BranchInstruction::If(OrdComparison::NE, skip) if skip != end
    ));
    assert_eq!(branches[2], BranchInstruction::Return);
}

#[test]
fn unverifiable_code_is_rejected() {
    let events = vec![
        Code,
        Insn(Instruction::Pop),
        Branch(BranchInstruction::Return),
    ];
    let result = ClassFixture::new("me/Broken", Version::JAVA8)
        .method(MethodAccessFlags::STATIC, "broken", "()V", events)
        .write();
    match result {
        Err(Error::VerificationImpossible {
            method,
            instruction,
            kind,
        }) => {
            assert_eq!(method, "me/Broken.broken()V");
            assert_eq!(instruction, 0);
            assert!(matches!(kind, VerifierErrorKind::EmptyStack));
        }
        other => panic!("expected a verification failure, got {:?}", other),
    }
}

#[test]
fn malformed_classes_are_rejected() {
    assert!(matches!(
        ClassReader::new(&[0xCA, 0xFE, 0xBA]),
        Err(Error::MalformedInput(MalformedKind::Truncated { .. }))
    ));
    assert!(matches!(
        ClassReader::new(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]),
        Err(Error::MalformedInput(MalformedKind::BadMagic(0xDEADBEEF)))
    ));

    // Cut off in the middle of the methods
    let bytes = sum_class(Version::JAVA8);
    assert!(matches!(
        ClassReader::new(&bytes[..bytes.len() - 8]),
        Err(Error::MalformedInput(MalformedKind::Truncated { .. }))
    ));
}
