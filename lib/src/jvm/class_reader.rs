use super::class_file::{
    Attribute, AttributeLike, BytecodeIndex, ClassFile, Code, ConstantsPool, LineNumberTable,
    LocalVariableEntry, LocalVariableTable, LocalVariableTypeTable, Method, SerializableType,
    StackMapFrame, StackMapTable, Version,
};
use super::code::{
    decode_instructions, AnyInstruction, Label, LabelGenerator, LocalVariable, TryCatchBlock,
};
use super::descriptors::ParseDescriptor;
use super::verifier::{Frame, VerificationType};
use super::visitor::{
    ClassHeader, ClassVisitor, FieldHeader, FrameHint, MethodHeader, MethodVisitor, RawAttribute,
};
use super::{BinaryName, Error, MalformedKind, Name, RefType, UnqualifiedName};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Parsed class file, ready to be replayed to visitors
///
/// Parsing the outer structure happens up front, but member descriptors and method bodies are
/// only decoded while visiting.
#[derive(Debug)]
pub struct ClassReader {
    class_file: ClassFile,
}

impl ClassReader {
    pub fn new(bytes: &[u8]) -> Result<ClassReader, Error> {
        Ok(ClassReader {
            class_file: ClassFile::parse(bytes)?,
        })
    }

    pub fn class_name(&self) -> Result<BinaryName, Error> {
        binary_name(&self.class_file.constants, self.class_file.this_class.0 .0)
    }

    pub fn version(&self) -> Version {
        self.class_file.version
    }

    /// Constant pool of the class being read
    ///
    /// A writer seeded with these keeps untouched constants at their original indices.
    pub fn constants(&self) -> &ConstantsPool {
        &self.class_file.constants
    }

    pub fn header(&self) -> Result<ClassHeader, Error> {
        let constants = &self.class_file.constants;
        let superclass = match self.class_file.super_class {
            Some(class) => Some(binary_name(constants, class.0 .0)?),
            None => None,
        };
        let interfaces = self
            .class_file
            .interfaces
            .iter()
            .map(|interface| binary_name(constants, interface.0 .0))
            .collect::<Result<_, _>>()?;
        Ok(ClassHeader {
            version: self.class_file.version,
            access_flags: self.class_file.access_flags,
            name: self.class_name()?,
            superclass,
            interfaces,
        })
    }

    /// Replay the class to a visitor
    pub fn accept(&self, visitor: &mut dyn ClassVisitor) -> Result<(), Error> {
        let constants = &self.class_file.constants;
        let header = self.header()?;
        visitor.visit_header(&header)?;

        for field in &self.class_file.fields {
            visitor.visit_field(&FieldHeader {
                access_flags: field.access_flags,
                name: unqualified_name(constants, field.name_index.0 .0)?,
                descriptor: descriptor(constants, field.descriptor_index.0 .0)?,
                attributes: raw_attributes(constants, &field.attributes)?,
            })?;
        }

        for method in &self.class_file.methods {
            self.accept_method(&header, method, visitor)?;
        }

        for attribute in raw_attributes(constants, &self.class_file.attributes)? {
            visitor.visit_attribute(&attribute)?;
        }

        visitor.visit_end()
    }

    fn accept_method(
        &self,
        class: &ClassHeader,
        method: &Method,
        visitor: &mut dyn ClassVisitor,
    ) -> Result<(), Error> {
        let constants = &self.class_file.constants;
        let mut code = None;
        let mut attributes = vec![];
        for attribute in &method.attributes {
            let name = constants.utf8_string(attribute.name_index.0 .0)?;
            if name == Code::NAME {
                if code.is_some() {
                    return Err(MalformedKind::DuplicateCode.into());
                }
                code = Some(attribute.decode::<Code>()?);
            } else {
                attributes.push(RawAttribute {
                    name,
                    info: attribute.info.clone(),
                });
            }
        }

        let header = MethodHeader {
            access_flags: method.access_flags,
            name: unqualified_name(constants, method.name_index.0 .0)?,
            descriptor: descriptor(constants, method.descriptor_index.0 .0)?,
            attributes,
        };
        let mut method_visitor = match visitor.visit_method(&header)? {
            Some(method_visitor) => method_visitor,
            None => return Ok(()),
        };
        if let Some(code) = code {
            let body = MethodBody::read(constants, class, &header, &code)?;
            body.accept(method_visitor.as_mut())?;
        }
        method_visitor.visit_end()
    }
}

/// Labels for offsets in a code array, created as offsets get referenced
struct CodeLabels {
    generator: LabelGenerator,
    labels: HashMap<usize, Label>,

    /// Offsets at which an instruction starts, plus the end of the code
    boundaries: HashSet<usize>,
}

impl CodeLabels {
    fn label_at(&mut self, offset: usize) -> Result<Label, MalformedKind> {
        if !self.boundaries.contains(&offset) {
            return Err(MalformedKind::InvalidCodeOffset(offset));
        }
        let generator = &mut self.generator;
        Ok(*self
            .labels
            .entry(offset)
            .or_insert_with(|| generator.fresh_label()))
    }
}

/// Method body with every offset already turned into a label
struct MethodBody {
    instructions: Vec<(usize, AnyInstruction<Label>)>,
    code_length: usize,
    labels: HashMap<usize, Label>,
    try_catch_blocks: Vec<TryCatchBlock>,
    frames: HashMap<usize, FrameHint>,
    line_numbers: HashMap<usize, Vec<u16>>,
    local_variables: Vec<LocalVariable>,
}

impl MethodBody {
    fn read(
        constants: &ConstantsPool,
        class: &ClassHeader,
        method: &MethodHeader,
        code: &Code,
    ) -> Result<MethodBody, Error> {
        let code_length = code.code_array.0.len();
        let decoded = decode_instructions(&code.code_array.0, constants)?;
        let mut labels = CodeLabels {
            generator: LabelGenerator::new(),
            labels: HashMap::new(),
            boundaries: decoded
                .iter()
                .map(|(offset, _)| *offset)
                .chain(std::iter::once(code_length))
                .collect(),
        };

        let mut instructions = Vec::with_capacity(decoded.len());
        for (offset, instruction) in decoded {
            let instruction = match instruction {
                AnyInstruction::Regular(instruction) => AnyInstruction::Regular(instruction),
                AnyInstruction::Branch(branch) => AnyInstruction::Branch(
                    branch.try_map_labels(|target| labels.label_at(*target))?,
                ),
            };
            instructions.push((offset, instruction));
        }

        let mut try_catch_blocks = Vec::with_capacity(code.exception_table.len());
        for handler in &code.exception_table {
            let catch_type = match handler.catch_type {
                Some(class) => Some(binary_name(constants, class.0 .0)?),
                None => None,
            };
            try_catch_blocks.push(TryCatchBlock {
                start: labels.label_at(handler.start_pc.0 as usize)?,
                end: labels.label_at(handler.end_pc.0 as usize)?,
                handler: labels.label_at(handler.handler_pc.0 as usize)?,
                catch_type,
            });
        }

        let mut frames = HashMap::new();
        let mut line_numbers: HashMap<usize, Vec<u16>> = HashMap::new();
        let mut variables = vec![];
        let mut variable_types = vec![];
        for attribute in &code.attributes {
            let name = constants.utf8_string(attribute.name_index.0 .0)?;
            match name.as_str() {
                StackMapTable::NAME => {
                    let table = attribute.decode::<StackMapTable>()?;
                    frames = expand_frames(constants, class, method, &table, &mut labels)?;
                }
                LineNumberTable::NAME => {
                    for entry in attribute.decode::<LineNumberTable>()?.0 {
                        let offset = entry.start_pc.0 as usize;
                        labels.label_at(offset)?;
                        line_numbers
                            .entry(offset)
                            .or_default()
                            .push(entry.line_number);
                    }
                }
                LocalVariableTable::NAME => {
                    variables.extend(attribute.decode::<LocalVariableTable>()?.0);
                }
                LocalVariableTypeTable::NAME => {
                    variable_types.extend(attribute.decode::<LocalVariableTypeTable>()?.0);
                }
                _ => warn!(
                    "dropping `{}` attribute from the code of {}.{}",
                    name, class.name, method.name
                ),
            }
        }

        let local_variables = local_variables(constants, &variables, &variable_types, &mut labels)?;

        Ok(MethodBody {
            instructions,
            code_length,
            labels: labels.labels,
            try_catch_blocks,
            frames,
            line_numbers,
            local_variables,
        })
    }

    fn accept(&self, visitor: &mut dyn MethodVisitor) -> Result<(), Error> {
        visitor.visit_code()?;
        for block in &self.try_catch_blocks {
            visitor.visit_try_catch_block(block)?;
        }

        for (offset, instruction) in &self.instructions {
            if let Some(label) = self.labels.get(offset) {
                visitor.visit_label(*label)?;
                if let Some(frame) = self.frames.get(offset) {
                    visitor.visit_frame(frame)?;
                }
                for line in self.line_numbers.get(offset).into_iter().flatten() {
                    visitor.visit_line_number(*line, *label)?;
                }
            }
            match instruction {
                AnyInstruction::Regular(instruction) => visitor.visit_instruction(instruction)?,
                AnyInstruction::Branch(branch) => visitor.visit_branch_instruction(branch)?,
            }
        }
        if let Some(label) = self.labels.get(&self.code_length) {
            visitor.visit_label(*label)?;
        }

        for local_variable in &self.local_variables {
            visitor.visit_local_variable(local_variable)?;
        }
        Ok(())
    }
}

/// Turn the delta-encoded frames of a `StackMapTable` into complete frames, keyed by offset
fn expand_frames(
    constants: &ConstantsPool,
    class: &ClassHeader,
    method: &MethodHeader,
    table: &StackMapTable,
    labels: &mut CodeLabels,
) -> Result<HashMap<usize, FrameHint>, Error> {
    let initial: FrameHint = Frame::initial(
        &class.name,
        &method.name,
        &method.descriptor,
        method.is_static(),
    );
    let mut locals = initial.compact_locals();
    let mut previous_offset: Option<usize> = None;
    let mut frames = HashMap::new();

    for frame in &table.0 {
        let offset_delta = frame.offset_delta() as usize;
        let offset = match previous_offset {
            None => offset_delta,
            Some(previous) => previous + offset_delta + 1,
        };
        let invalid = || MalformedKind::InvalidFrame { offset };
        if !labels.boundaries.contains(&offset) {
            return Err(invalid().into());
        }

        let stack = match frame {
            StackMapFrame::SameLocalsNoStack { .. } => vec![],
            StackMapFrame::SameLocalsOneStack { stack, .. } => {
                vec![resolve_type(constants, stack, labels)?]
            }
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                let chopped = *chopped_k as usize;
                if chopped > locals.len() {
                    return Err(invalid().into());
                }
                locals.truncate(locals.len() - chopped);
                vec![]
            }
            StackMapFrame::AppendLocalsNoStack {
                locals: appended, ..
            } => {
                for local in appended {
                    locals.push(resolve_type(constants, local, labels)?);
                }
                vec![]
            }
            StackMapFrame::Full {
                locals: full_locals,
                stack,
                ..
            } => {
                locals = full_locals
                    .iter()
                    .map(|local| resolve_type(constants, local, labels))
                    .collect::<Result<_, _>>()?;
                stack
                    .iter()
                    .map(|vtype| resolve_type(constants, vtype, labels))
                    .collect::<Result<_, _>>()?
            }
        };

        labels.label_at(offset)?;
        frames.insert(
            offset,
            Frame {
                locals: locals.clone(),
                stack,
            },
        );
        previous_offset = Some(offset);
    }

    debug!(
        "read {} frame(s) for {}.{}",
        frames.len(),
        class.name,
        method.name
    );
    Ok(frames)
}

fn resolve_type(
    constants: &ConstantsPool,
    vtype: &SerializableType,
    labels: &mut CodeLabels,
) -> Result<VerificationType<RefType<BinaryName>, Label>, MalformedKind> {
    vtype.try_map(
        |class| constants.ref_type(class.0 .0),
        |BytecodeIndex(offset)| labels.label_at(*offset as usize),
    )
}

/// Pair up `LocalVariableTable` entries with the matching `LocalVariableTypeTable` entries
fn local_variables(
    constants: &ConstantsPool,
    variables: &[LocalVariableEntry],
    variable_types: &[LocalVariableEntry],
    labels: &mut CodeLabels,
) -> Result<Vec<LocalVariable>, Error> {
    let mut local_variables = Vec::with_capacity(variables.len());
    for variable in variables {
        let signature = variable_types.iter().find(|typed| {
            typed.start_pc == variable.start_pc
                && typed.length == variable.length
                && typed.index == variable.index
        });
        let signature = match signature {
            Some(typed) => Some(constants.utf8_string(typed.descriptor_index.0 .0)?),
            None => None,
        };
        let start = variable.start_pc.0 as usize;
        local_variables.push(LocalVariable {
            name: constants.utf8_string(variable.name_index.0 .0)?,
            descriptor: constants.utf8_string(variable.descriptor_index.0 .0)?,
            signature,
            start: labels.label_at(start)?,
            end: labels.label_at(start + variable.length as usize)?,
            index: variable.index,
        });
    }
    Ok(local_variables)
}

fn raw_attributes(
    constants: &ConstantsPool,
    attributes: &[Attribute],
) -> Result<Vec<RawAttribute>, Error> {
    attributes
        .iter()
        .map(|attribute| {
            Ok(RawAttribute {
                name: constants.utf8_string(attribute.name_index.0 .0)?,
                info: attribute.info.clone(),
            })
        })
        .collect()
}

fn binary_name(constants: &ConstantsPool, index: u16) -> Result<BinaryName, Error> {
    let name = constants.class_name(index)?;
    Ok(BinaryName::from_string(name).map_err(MalformedKind::InvalidName)?)
}

fn unqualified_name(constants: &ConstantsPool, index: u16) -> Result<UnqualifiedName, Error> {
    let name = constants.utf8_string(index)?;
    Ok(UnqualifiedName::from_string(name).map_err(MalformedKind::InvalidName)?)
}

fn descriptor<D: ParseDescriptor>(constants: &ConstantsPool, index: u16) -> Result<D, Error> {
    let descriptor = constants.utf8_string(index)?;
    Ok(D::parse(&descriptor).map_err(MalformedKind::InvalidDescriptor)?)
}
