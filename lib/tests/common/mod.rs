#![allow(dead_code)]

use hotpatch::jvm::class_file::{ClassFile, Code, Version};
use hotpatch::jvm::class_graph::ClassGraph;
use hotpatch::jvm::code::{
    BranchInstruction, FieldRef, Instruction, Label, LocalVariable, TryCatchBlock,
};
use hotpatch::jvm::visitor::{ClassHeader, FrameHint, MethodHeader};
use hotpatch::jvm::{
    BinaryName, ClassAccessFlags, ClassReader, ClassVisitor, ClassWriter, Error, FieldType,
    MethodAccessFlags, MethodDescriptor, MethodVisitor, Name, ParseDescriptor, UnqualifiedName,
};

/// Everything a method visitor can be told
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MethodEvent {
    Code,
    TryCatch(TryCatchBlock),
    Label(Label),
    LineNumber(u16, Label),
    Frame(FrameHint),
    Insn(Instruction),
    Branch(BranchInstruction<Label>),
    LocalVariable(LocalVariable),
}

/// Class visitor that records the methods it sees
#[derive(Default)]
pub struct Recorder {
    pub header: Option<ClassHeader>,
    pub methods: Vec<(MethodHeader, Vec<MethodEvent>)>,
}

impl Recorder {
    pub fn method(&self, name: &str) -> &[MethodEvent] {
        self.methods
            .iter()
            .find(|(header, _)| header.name.as_str() == name)
            .map(|(_, events)| events.as_slice())
            .unwrap_or_else(|| panic!("no method named {}", name))
    }

    pub fn branches(&self, name: &str) -> Vec<BranchInstruction<Label>> {
        self.method(name)
            .iter()
            .filter_map(|event| match event {
                MethodEvent::Branch(branch) => Some(branch.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn frames(&self, name: &str) -> Vec<FrameHint> {
        self.method(name)
            .iter()
            .filter_map(|event| match event {
                MethodEvent::Frame(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }
}

struct MethodRecorder<'a> {
    events: &'a mut Vec<MethodEvent>,
}

impl ClassVisitor for Recorder {
    fn visit_header(&mut self, header: &ClassHeader) -> Result<(), Error> {
        self.header = Some(header.clone());
        Ok(())
    }

    fn visit_method<'a>(
        &'a mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodVisitor + 'a>>, Error> {
        self.methods.push((method.clone(), vec![]));
        let events = &mut self.methods.last_mut().unwrap().1;
        Ok(Some(Box::new(MethodRecorder { events })))
    }
}

impl MethodVisitor for MethodRecorder<'_> {
    fn visit_code(&mut self) -> Result<(), Error> {
        self.events.push(MethodEvent::Code);
        Ok(())
    }

    fn visit_try_catch_block(&mut self, block: &TryCatchBlock) -> Result<(), Error> {
        self.events.push(MethodEvent::TryCatch(block.clone()));
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        self.events.push(MethodEvent::Label(label));
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        self.events.push(MethodEvent::LineNumber(line, start));
        Ok(())
    }

    fn visit_frame(&mut self, frame: &FrameHint) -> Result<(), Error> {
        self.events.push(MethodEvent::Frame(frame.clone()));
        Ok(())
    }

    fn visit_instruction(&mut self, instruction: &Instruction) -> Result<(), Error> {
        self.events.push(MethodEvent::Insn(instruction.clone()));
        Ok(())
    }

    fn visit_branch_instruction(
        &mut self,
        instruction: &BranchInstruction<Label>,
    ) -> Result<(), Error> {
        self.events.push(MethodEvent::Branch(instruction.clone()));
        Ok(())
    }

    fn visit_local_variable(&mut self, local_variable: &LocalVariable) -> Result<(), Error> {
        self.events.push(MethodEvent::LocalVariable(local_variable.clone()));
        Ok(())
    }
}

/// Feed recorded events back into a method visitor
pub fn replay(visitor: &mut dyn MethodVisitor, events: &[MethodEvent]) -> Result<(), Error> {
    for event in events {
        match event {
            MethodEvent::Code => visitor.visit_code()?,
            MethodEvent::TryCatch(block) => visitor.visit_try_catch_block(block)?,
            MethodEvent::Label(label) => visitor.visit_label(*label)?,
            MethodEvent::LineNumber(line, start) => visitor.visit_line_number(*line, *start)?,
            MethodEvent::Frame(frame) => visitor.visit_frame(frame)?,
            MethodEvent::Insn(instruction) => visitor.visit_instruction(instruction)?,
            MethodEvent::Branch(branch) => visitor.visit_branch_instruction(branch)?,
            MethodEvent::LocalVariable(variable) => visitor.visit_local_variable(variable)?,
        }
    }
    visitor.visit_end()
}

/// Class to be generated by driving a `ClassWriter`
pub struct ClassFixture {
    pub header: ClassHeader,
    pub methods: Vec<(MethodHeader, Vec<MethodEvent>)>,
}

impl ClassFixture {
    pub fn new(name: &str, version: Version) -> ClassFixture {
        ClassFixture {
            header: ClassHeader {
                version,
                access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                name: binary_name(name),
                superclass: Some(BinaryName::OBJECT),
                interfaces: vec![],
            },
            methods: vec![],
        }
    }

    /// Add a method (without code if `events` is empty)
    pub fn method(
        mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        events: Vec<MethodEvent>,
    ) -> ClassFixture {
        let header = MethodHeader {
            access_flags,
            name: unqualified_name(name),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            attributes: vec![],
        };
        self.methods.push((header, events));
        self
    }

    pub fn write(&self) -> Result<Vec<u8>, Error> {
        init_logging();
        let graph = ClassGraph::with_java_library_types();
        let mut writer = ClassWriter::new(&graph);
        writer.visit_header(&self.header)?;
        for (header, events) in &self.methods {
            let mut method = writer.visit_method(header)?.unwrap();
            replay(method.as_mut(), events)?;
        }
        writer.visit_end()?;
        writer.into_bytes()
    }
}

/// Route library logs through the test harness (`RUST_LOG=debug cargo test` to see them)
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Replay a class into a `Recorder`
pub fn record(bytes: &[u8]) -> Recorder {
    let mut recorder = Recorder::default();
    ClassReader::new(bytes)
        .unwrap()
        .accept(&mut recorder)
        .unwrap();
    recorder
}

/// Read a class and write it right back out, without any transformation in between
pub fn rewrite(bytes: &[u8]) -> Vec<u8> {
    init_logging();
    let reader = ClassReader::new(bytes).unwrap();
    let graph = ClassGraph::with_java_library_types();
    let mut writer = ClassWriter::from_reader(&reader, &graph);
    reader.accept(&mut writer).unwrap();
    writer.into_bytes().unwrap()
}

/// `Code` attribute of the method with the given name
pub fn code_of(bytes: &[u8], name: &str) -> Code {
    let class_file = ClassFile::parse(bytes).unwrap();
    let constants = &class_file.constants;
    let method = class_file
        .methods
        .iter()
        .find(|method| constants.utf8_string(method.name_index.0 .0).unwrap() == name)
        .unwrap();
    let code = method
        .attributes
        .iter()
        .find(|attribute| constants.utf8_string(attribute.name_index.0 .0).unwrap() == "Code")
        .unwrap();
    code.decode::<Code>().unwrap()
}

/// Names of the attributes inside a `Code` attribute
pub fn code_attribute_names(bytes: &[u8], code: &Code) -> Vec<String> {
    let class_file = ClassFile::parse(bytes).unwrap();
    code.attributes
        .iter()
        .map(|attribute| {
            class_file
                .constants
                .utf8_string(attribute.name_index.0 .0)
                .unwrap()
        })
        .collect()
}

pub fn binary_name(name: &str) -> BinaryName {
    BinaryName::from_string(name.to_owned()).unwrap()
}

pub fn unqualified_name(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_string(name.to_owned()).unwrap()
}

pub fn field(owner: &str, name: &str, descriptor: &str) -> FieldRef {
    FieldRef {
        owner: binary_name(owner),
        name: unqualified_name(name),
        descriptor: FieldType::parse(descriptor).unwrap(),
    }
}
