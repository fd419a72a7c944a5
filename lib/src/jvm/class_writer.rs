use super::class_file::{
    Attribute, ClassConstantIndex, ClassFile, ConstantsPool, Field, Method, Version,
};
use super::class_graph::{ClassData, ClassGraph};
use super::class_reader::ClassReader;
use super::code::{BranchInstruction, Instruction, Label, LocalVariable, MethodCode, TryCatchBlock};
use super::descriptors::RenderDescriptor;
use super::verifier::MethodContext;
use super::visitor::{
    ClassHeader, ClassVisitor, FieldHeader, FrameHint, MethodHeader, MethodVisitor, RawAttribute,
};
use super::{BinaryName, ClassAccessFlags, Error, Name};
use log::debug;

/// Visitor that turns the events it receives back into a class file
///
/// Method bodies get assembled as each method ends: jump offsets, max stack, max locals, and
/// (for class files new enough to have them) stack map frames are all computed from scratch.
/// Reference types in frames are merged using the class graph, and the class being written gets
/// added to that graph when its header is visited.
pub struct ClassWriter<'g> {
    graph: &'g ClassGraph,
    constants: ConstantsPool,
    header: Option<WrittenHeader>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    attributes: Vec<Attribute>,
}

struct WrittenHeader {
    version: Version,
    access_flags: ClassAccessFlags,
    name: BinaryName,
    this_class: ClassConstantIndex,
    super_class: Option<ClassConstantIndex>,
    interfaces: Vec<ClassConstantIndex>,
}

impl<'g> ClassWriter<'g> {
    /// Writer starting from an empty constant pool
    pub fn new(graph: &'g ClassGraph) -> ClassWriter<'g> {
        ClassWriter::with_constants(ConstantsPool::new(), graph)
    }

    /// Writer starting from the constant pool of the class being read
    ///
    /// Constants that are no longer used stay in the pool.
    pub fn from_reader(reader: &ClassReader, graph: &'g ClassGraph) -> ClassWriter<'g> {
        ClassWriter::with_constants(reader.constants().clone(), graph)
    }

    fn with_constants(constants: ConstantsPool, graph: &'g ClassGraph) -> ClassWriter<'g> {
        ClassWriter {
            graph,
            constants,
            header: None,
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    fn raw_attribute(&mut self, attribute: &RawAttribute) -> Result<Attribute, Error> {
        Ok(Attribute {
            name_index: self.constants.get_utf8(&attribute.name)?,
            info: attribute.info.clone(),
        })
    }

    fn raw_attributes(&mut self, attributes: &[RawAttribute]) -> Result<Vec<Attribute>, Error> {
        attributes
            .iter()
            .map(|attribute| self.raw_attribute(attribute))
            .collect()
    }

    /// Serialize everything visited so far
    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        let header = self.header.ok_or(Error::MissingClassHeader)?;
        debug!(
            "writing {} with {} constant(s), {} field(s), {} method(s)",
            header.name,
            self.constants.len(),
            self.fields.len(),
            self.methods.len()
        );
        ClassFile {
            version: header.version,
            constants: self.constants,
            access_flags: header.access_flags,
            this_class: header.this_class,
            super_class: header.super_class,
            interfaces: header.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        }
        .to_bytes()
    }
}

impl<'g> ClassVisitor for ClassWriter<'g> {
    fn visit_header(&mut self, header: &ClassHeader) -> Result<(), Error> {
        self.graph.add_class(ClassData {
            name: header.name.clone(),
            superclass: header.superclass.clone(),
            interfaces: header.interfaces.clone(),
            is_interface: header.access_flags.contains(ClassAccessFlags::INTERFACE),
        });

        let this_class = self.constants.get_class(header.name.as_str())?;
        let super_class = match &header.superclass {
            Some(superclass) => Some(self.constants.get_class(superclass.as_str())?),
            None => None,
        };
        let interfaces = header
            .interfaces
            .iter()
            .map(|interface| self.constants.get_class(interface.as_str()))
            .collect::<Result<_, _>>()?;
        self.header = Some(WrittenHeader {
            version: header.version,
            access_flags: header.access_flags,
            name: header.name.clone(),
            this_class,
            super_class,
            interfaces,
        });
        Ok(())
    }

    fn visit_field(&mut self, field: &FieldHeader) -> Result<(), Error> {
        let field = Field {
            access_flags: field.access_flags,
            name_index: self.constants.get_utf8(field.name.as_str())?,
            descriptor_index: self.constants.get_utf8(&field.descriptor.render())?,
            attributes: self.raw_attributes(&field.attributes)?,
        };
        self.fields.push(field);
        Ok(())
    }

    fn visit_method<'a>(
        &'a mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodVisitor + 'a>>, Error> {
        Ok(Some(Box::new(MethodWriter {
            class: self,
            method: method.clone(),
            code: None,
        })))
    }

    fn visit_attribute(&mut self, attribute: &RawAttribute) -> Result<(), Error> {
        let attribute = self.raw_attribute(attribute)?;
        self.attributes.push(attribute);
        Ok(())
    }
}

/// Collects one method, adding it to the class when the method ends
struct MethodWriter<'a, 'g> {
    class: &'a mut ClassWriter<'g>,
    method: MethodHeader,

    /// `None` until the method turns out to have a body
    code: Option<MethodCode>,
}

impl MethodWriter<'_, '_> {
    fn code(&mut self) -> &mut MethodCode {
        self.code.get_or_insert_with(MethodCode::new)
    }
}

impl MethodVisitor for MethodWriter<'_, '_> {
    fn visit_code(&mut self) -> Result<(), Error> {
        self.code();
        Ok(())
    }

    fn visit_try_catch_block(&mut self, block: &TryCatchBlock) -> Result<(), Error> {
        self.code().add_try_catch_block(block.clone());
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Error> {
        self.code().place_label(label)
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        self.code().add_line_number(line, start);
        Ok(())
    }

    fn visit_frame(&mut self, frame: &FrameHint) -> Result<(), Error> {
        self.code().add_frame_hint(frame);
        Ok(())
    }

    fn visit_instruction(&mut self, instruction: &Instruction) -> Result<(), Error> {
        self.code().push_instruction(instruction.clone());
        Ok(())
    }

    fn visit_branch_instruction(
        &mut self,
        instruction: &BranchInstruction<Label>,
    ) -> Result<(), Error> {
        self.code().push_branch_instruction(instruction.clone());
        Ok(())
    }

    fn visit_local_variable(&mut self, local_variable: &LocalVariable) -> Result<(), Error> {
        self.code().add_local_variable(local_variable.clone());
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        let class = &mut *self.class;
        let header = class.header.as_ref().ok_or(Error::MissingClassHeader)?;

        let mut attributes = vec![];
        if let Some(code) = &self.code {
            let context = MethodContext {
                this_class: &header.name,
                name: &self.method.name,
                descriptor: &self.method.descriptor,
                is_static: self.method.is_static(),
                strict: header.version.uses_stack_map_frames(),
                graph: class.graph,
            };
            let code = code.assemble(&context, &mut class.constants)?;
            attributes.push(class.constants.get_attribute(&code)?);
        }
        attributes.extend(class.raw_attributes(&self.method.attributes)?);

        let method = Method {
            access_flags: self.method.access_flags,
            name_index: class.constants.get_utf8(self.method.name.as_str())?,
            descriptor_index: class.constants.get_utf8(&self.method.descriptor.render())?,
            attributes,
        };
        class.methods.push(method);
        Ok(())
    }
}
