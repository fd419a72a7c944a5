use super::jump_encoding::{lay_out, Layout, LayoutInstruction, SIGNED_16BIT_JUMP_RANGE};
use super::{encode_instruction, AnyInstruction, BranchInstruction, Instruction, Label};
use crate::jvm::class_file::{
    BytecodeArray, BytecodeIndex, Code, ConstantsPool, ExceptionHandler, LineNumber,
    LineNumberTable, LocalVariableEntry, LocalVariableTable, LocalVariableTypeTable,
    StackMapTable,
};
use crate::jvm::descriptors::RenderDescriptor;
use crate::jvm::verifier::{
    analyze, max_locals, AnalysisFrame, AnalysisType, Frame, Handler, MethodContext,
    VerificationType,
};
use crate::jvm::{BinaryName, Error, Name, RefType};
use log::debug;
use std::collections::{BTreeSet, HashMap};

/// Exception handler covering a range of code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    /// Start of the covered range (inclusive)
    pub start: Label,

    /// End of the covered range (exclusive)
    pub end: Label,
    pub handler: Label,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<BinaryName>,
}

/// Debug information about a local variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,

    /// Generic signature, from the `LocalVariableTypeTable`
    pub signature: Option<String>,
    pub start: Label,
    pub end: Label,
    pub index: u16,
}

/// Method body accumulated from visitor events
///
/// Labels get attached to the index of the next instruction pushed, so a label placed after
/// the last instruction refers to the end of the code.
#[derive(Debug, Default)]
pub struct MethodCode {
    instructions: Vec<AnyInstruction<Label>>,
    labels: HashMap<Label, usize>,
    try_catch_blocks: Vec<TryCatchBlock>,
    line_numbers: Vec<(u16, Label)>,
    local_variables: Vec<LocalVariable>,

    /// Frames from the original code, keyed by instruction index
    frame_hints: HashMap<usize, Frame<RefType<BinaryName>, Label>>,
}

impl MethodCode {
    pub fn new() -> MethodCode {
        MethodCode::default()
    }

    pub fn place_label(&mut self, label: Label) -> Result<(), Error> {
        if self.labels.insert(label, self.instructions.len()).is_some() {
            return Err(Error::DuplicateLabel(label));
        }
        Ok(())
    }

    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(AnyInstruction::Regular(instruction));
    }

    pub fn push_branch_instruction(&mut self, instruction: BranchInstruction<Label>) {
        self.instructions.push(AnyInstruction::Branch(instruction));
    }

    pub fn add_try_catch_block(&mut self, block: TryCatchBlock) {
        self.try_catch_blocks.push(block);
    }

    pub fn add_line_number(&mut self, line: u16, start: Label) {
        self.line_numbers.push((line, start));
    }

    pub fn add_local_variable(&mut self, local_variable: LocalVariable) {
        self.local_variables.push(local_variable);
    }

    /// Record a frame from the original code at the current position
    ///
    /// Locals are listed one entry per value, as in a `StackMapTable`.
    pub fn add_frame_hint(&mut self, frame: &Frame<RefType<BinaryName>, Label>) {
        let expanded = Frame::from_compact(frame.locals.clone(), frame.stack.clone());
        self.frame_hints.insert(self.instructions.len(), expanded);
    }

    fn position(&self, label: &Label) -> Result<usize, Error> {
        self.labels
            .get(label)
            .copied()
            .ok_or(Error::UnplacedLabel(*label))
    }

    /// Lay out the code into a `Code` attribute
    ///
    /// This is where max stack, max locals, and (in strict mode) the stack map table get
    /// computed. Unreachable code is replaced with `athrow` in strict mode since the type
    /// checker needs a frame for every instruction following an unconditional jump.
    pub fn assemble(
        &self,
        context: &MethodContext<'_>,
        constants: &mut ConstantsPool,
    ) -> Result<Code, Error> {
        let method_name = || {
            format!(
                "{}.{}{}",
                context.this_class,
                context.name,
                context.descriptor.render()
            )
        };

        let instructions = self
            .instructions
            .iter()
            .map(|instruction| match instruction {
                AnyInstruction::Regular(instruction) => {
                    Ok(AnyInstruction::Regular(instruction.clone()))
                }
                AnyInstruction::Branch(branch) => branch
                    .try_map_labels(|label| self.position(label))
                    .map(AnyInstruction::Branch),
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let handlers = self
            .try_catch_blocks
            .iter()
            .map(|block| {
                Ok(Handler {
                    start: self.position(&block.start)?,
                    end: self.position(&block.end)?,
                    handler: self.position(&block.handler)?,
                    catch_type: block.catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let analysis = analyze(&instructions, &handlers, &self.frame_hints, context).map_err(
            |(instruction, kind)| Error::VerificationImpossible {
                method: method_name(),
                instruction,
                kind,
            },
        )?;
        let mut max_stack = analysis.max_stack;

        let body = if context.strict {
            let body = Body::collapse_unreachable(instructions, analysis.frames, handlers);
            if body.collapsed_runs > 0 {
                debug!(
                    "replaced {} unreachable code run(s) in {}",
                    body.collapsed_runs,
                    method_name()
                );
                max_stack = max_stack.max(1);
            }
            body
        } else {
            Body::unchanged(instructions, analysis.frames, handlers)
        };
        let max_locals = max_locals(&body.instructions, context.descriptor, context.is_static);

        if max_stack > u16::MAX as usize {
            return Err(Error::MethodCodeMaxStackOverflow {
                method: method_name(),
                max_stack,
            });
        }
        if max_locals > u16::MAX as usize {
            return Err(Error::MethodCodeMaxLocalsOverflow {
                method: method_name(),
                max_locals,
            });
        }

        let mut layout_instructions = Vec::with_capacity(body.instructions.len());
        for instruction in &body.instructions {
            layout_instructions.push(match instruction {
                AnyInstruction::Regular(instruction) => {
                    let mut bytes = vec![];
                    encode_instruction(instruction, constants, &mut bytes)?;
                    LayoutInstruction::Encoded(bytes)
                }
                AnyInstruction::Branch(branch) => LayoutInstruction::Branch(branch.clone()),
            });
        }
        let layout = lay_out(&layout_instructions, &SIGNED_16BIT_JUMP_RANGE);
        if layout.code.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow {
                method: method_name(),
                code_length: layout.code.len(),
            });
        }
        if !layout.widened_conditionals.is_empty() {
            debug!(
                "widened {} conditional jump(s) in {}",
                layout.widened_conditionals.len(),
                method_name()
            );
        }

        let offset_of = |index: usize| BytecodeIndex(layout.offsets[index] as u16);
        let label_offset = |label: &Label| -> Result<BytecodeIndex, Error> {
            Ok(offset_of(body.positions[self.position(label)?]))
        };

        let mut exception_table = Vec::with_capacity(body.handlers.len());
        for handler in &body.handlers {
            let catch_type = match &handler.catch_type {
                Some(class) => Some(constants.get_class(class.as_str())?),
                None => None,
            };
            exception_table.push(ExceptionHandler {
                start_pc: offset_of(handler.start),
                end_pc: offset_of(handler.end),
                handler_pc: offset_of(handler.handler),
                catch_type,
            });
        }

        let mut attributes = vec![];

        if context.strict {
            let stack_map_table = body.stack_map_table(context, constants, &layout)?;
            if !stack_map_table.0.is_empty() {
                debug!(
                    "computed {} frame(s) for {}",
                    stack_map_table.0.len(),
                    method_name()
                );
                attributes.push(constants.get_attribute(&stack_map_table)?);
            }
        }

        if !self.line_numbers.is_empty() {
            let line_numbers = self
                .line_numbers
                .iter()
                .map(|(line_number, start)| {
                    Ok(LineNumber {
                        start_pc: label_offset(start)?,
                        line_number: *line_number,
                    })
                })
                .collect::<Result<_, Error>>()?;
            attributes.push(constants.get_attribute(&LineNumberTable(line_numbers))?);
        }

        if !self.local_variables.is_empty() {
            let mut variables = vec![];
            let mut variable_types = vec![];
            for local_variable in &self.local_variables {
                let start_pc = label_offset(&local_variable.start)?;
                let length = label_offset(&local_variable.end)?.0.saturating_sub(start_pc.0);
                let name_index = constants.get_utf8(&local_variable.name)?;
                variables.push(LocalVariableEntry {
                    start_pc,
                    length,
                    name_index,
                    descriptor_index: constants.get_utf8(&local_variable.descriptor)?,
                    index: local_variable.index,
                });
                if let Some(signature) = &local_variable.signature {
                    variable_types.push(LocalVariableEntry {
                        start_pc,
                        length,
                        name_index,
                        descriptor_index: constants.get_utf8(signature)?,
                        index: local_variable.index,
                    });
                }
            }
            attributes.push(constants.get_attribute(&LocalVariableTable(variables))?);
            if !variable_types.is_empty() {
                attributes.push(constants.get_attribute(&LocalVariableTypeTable(variable_types))?);
            }
        }

        Ok(Code {
            max_stack: max_stack as u16,
            max_locals: max_locals as u16,
            code_array: BytecodeArray(layout.code),
            exception_table,
            attributes,
        })
    }
}

/// Instructions ready for layout, along with their frames
struct Body {
    instructions: Vec<AnyInstruction<usize>>,
    frames: Vec<Option<AnalysisFrame>>,
    handlers: Vec<Handler>,

    /// Maps each original instruction index (and the end index) to its new index
    positions: Vec<usize>,
    collapsed_runs: usize,
}

impl Body {
    fn unchanged(
        instructions: Vec<AnyInstruction<usize>>,
        frames: Vec<Option<AnalysisFrame>>,
        handlers: Vec<Handler>,
    ) -> Body {
        let positions = (0..=instructions.len()).collect();
        Body {
            instructions,
            frames,
            handlers,
            positions,
            collapsed_runs: 0,
        }
    }

    /// Replace each run of unreachable instructions with a single `athrow`
    ///
    /// Labels inside a run end up on the `athrow`. Handler ranges get split so that they only
    /// cover reachable instructions.
    fn collapse_unreachable(
        instructions: Vec<AnyInstruction<usize>>,
        frames: Vec<Option<AnalysisFrame>>,
        handlers: Vec<Handler>,
    ) -> Body {
        let reachable: Vec<bool> = frames.iter().map(Option::is_some).collect();
        let mut positions = Vec::with_capacity(instructions.len() + 1);
        let mut kept_instructions = vec![];
        let mut kept_frames = vec![];
        let mut collapsed_runs = 0;

        for (index, (instruction, frame)) in instructions.into_iter().zip(frames).enumerate() {
            match frame {
                Some(frame) => {
                    positions.push(kept_instructions.len());
                    kept_instructions.push(instruction);
                    kept_frames.push(frame);
                }
                None if index > 0 && !reachable[index - 1] => {
                    positions.push(kept_instructions.len() - 1);
                }
                None => {
                    collapsed_runs += 1;
                    positions.push(kept_instructions.len());
                    kept_instructions.push(AnyInstruction::Branch(BranchInstruction::AThrow));
                    kept_frames.push(Frame {
                        locals: vec![],
                        stack: vec![VerificationType::Object(RefType::Object(
                            BinaryName::THROWABLE,
                        ))],
                    });
                }
            }
        }
        positions.push(kept_instructions.len());

        let instructions = kept_instructions
            .into_iter()
            .map(|instruction| match instruction {
                AnyInstruction::Branch(branch) => {
                    AnyInstruction::Branch(branch.map_labels(|target| positions[*target]))
                }
                regular => regular,
            })
            .collect();
        let frames = kept_frames
            .into_iter()
            .map(|frame| {
                let relocate = |vtype: &AnalysisType| {
                    vtype.map(|ref_type| ref_type.clone(), |index| positions[*index])
                };
                Some(Frame {
                    locals: frame.locals.iter().map(&relocate).collect(),
                    stack: frame.stack.iter().map(&relocate).collect(),
                })
            })
            .collect();

        let mut split_handlers = vec![];
        for handler in handlers {
            let mut range_start = None;
            for index in handler.start..=handler.end {
                let covered = index < handler.end && reachable[index];
                match range_start {
                    None if covered => range_start = Some(index),
                    Some(start) if !covered => {
                        split_handlers.push(Handler {
                            start: positions[start],
                            end: positions[index],
                            handler: positions[handler.handler],
                            catch_type: handler.catch_type.clone(),
                        });
                        range_start = None;
                    }
                    _ => (),
                }
            }
        }

        Body {
            instructions,
            frames,
            handlers: split_handlers,
            positions,
            collapsed_runs,
        }
    }

    /// Frames for every instruction that the type checker will want one for
    fn stack_map_table(
        &self,
        context: &MethodContext<'_>,
        constants: &mut ConstantsPool,
        layout: &Layout,
    ) -> Result<StackMapTable, Error> {
        let mut frame_indices = BTreeSet::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let AnyInstruction::Branch(branch) = instruction {
                frame_indices.extend(branch.jump_targets().into_iter().copied());
                if !branch.falls_through() {
                    frame_indices.insert(index + 1);
                }
            }
        }
        frame_indices.extend(self.handlers.iter().map(|handler| handler.handler));
        frame_indices.extend(layout.widened_conditionals.iter().map(|index| index + 1));

        let initial: AnalysisFrame = Frame::initial(
            context.this_class,
            context.name,
            context.descriptor,
            context.is_static,
        );
        let mut previous = initial.into_serializable(constants, &layout.offsets)?;
        let mut previous_offset = None;
        let mut stack_map_frames = vec![];

        for index in frame_indices {
            let frame = match self.frames.get(index) {
                Some(Some(frame)) => frame.into_serializable(constants, &layout.offsets)?,
                _ => continue,
            };
            let offset = layout.offsets[index];
            let offset_delta = match previous_offset {
                None => offset,
                Some(previous_offset) => offset - previous_offset - 1,
            };
            stack_map_frames.push(frame.stack_map_frame(offset_delta as u16, &previous));
            previous = frame;
            previous_offset = Some(offset);
        }

        Ok(StackMapTable(stack_map_frames))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::StackMapFrame;
    use crate::jvm::class_graph::ClassGraph;
    use crate::jvm::code::{FieldRef, LabelGenerator, OrdComparison};
    use crate::jvm::descriptors::ParseDescriptor;
    use crate::jvm::{FieldType, MethodDescriptor, UnqualifiedName, VerifierErrorKind};

    struct Method {
        this_class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
        graph: ClassGraph,
    }

    impl Method {
        fn new() -> Method {
            Method {
                this_class: BinaryName::from_string(String::from("Foo")).unwrap(),
                name: UnqualifiedName::from_string(String::from("format")).unwrap(),
                descriptor: MethodDescriptor::parse("()V").unwrap(),
                graph: ClassGraph::with_java_library_types(),
            }
        }

        fn assemble(
            &self,
            code: &MethodCode,
            strict: bool,
            constants: &mut ConstantsPool,
        ) -> Result<Code, Error> {
            let context = MethodContext {
                this_class: &self.this_class,
                name: &self.name,
                descriptor: &self.descriptor,
                is_static: false,
                strict,
                graph: &self.graph,
            };
            code.assemble(&context, constants)
        }
    }

    fn substitute() -> FieldRef {
        FieldRef {
            owner: BinaryName::from_string(String::from("Foo")).unwrap(),
            name: UnqualifiedName::from_string(String::from("substitute")).unwrap(),
            descriptor: FieldType::boolean(),
        }
    }

    /// `if (!this.substitute) goto end; goto end; nop; end: return`
    fn patched_body(labels: &mut LabelGenerator) -> MethodCode {
        let end = labels.fresh_label();
        let mut code = MethodCode::new();
        code.push_instruction(Instruction::ALoad(0));
        code.push_instruction(Instruction::GetField(substitute()));
        code.push_branch_instruction(BranchInstruction::If(OrdComparison::EQ, end));
        code.push_branch_instruction(BranchInstruction::Goto(end));
        code.push_instruction(Instruction::IConst1);
        code.push_instruction(Instruction::Pop);
        code.place_label(end).unwrap();
        code.push_branch_instruction(BranchInstruction::Return);
        code
    }

    #[test]
    fn unreachable_code_becomes_athrow() {
        let method = Method::new();
        let mut constants = ConstantsPool::new();
        let code = method
            .assemble(&patched_body(&mut LabelGenerator::new()), true, &mut constants)
            .unwrap();

        // aload_0, getfield #, ifeq +7, goto +4, athrow, return
        assert_eq!(code.code_array.0.len(), 1 + 3 + 3 + 3 + 1 + 1);
        assert_eq!(code.code_array.0[10], 0xbf);
        assert_eq!(&code.code_array.0[4..7], &[0x99, 0x00, 0x07]);
        assert_eq!(&code.code_array.0[7..10], &[0xa7, 0x00, 0x04]);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);

        let frames = code.attributes[0].decode::<StackMapTable>().unwrap();
        assert!(matches!(
            frames.0.as_slice(),
            [
                StackMapFrame::Full {
                    offset_delta: 10,
                    ..
                },
                StackMapFrame::AppendLocalsNoStack { offset_delta: 0, .. },
            ]
        ));
    }

    #[test]
    fn lenient_mode_keeps_unreachable_code() {
        let method = Method::new();
        let mut constants = ConstantsPool::new();
        let code = method
            .assemble(&patched_body(&mut LabelGenerator::new()), false, &mut constants)
            .unwrap();
        assert_eq!(code.code_array.0.len(), 1 + 3 + 3 + 3 + 1 + 1 + 1);
        assert!(code.attributes.is_empty());
    }

    #[test]
    fn handlers_are_split_around_unreachable_code() {
        let mut labels = LabelGenerator::new();
        let (start, end, handler, exit) = (
            labels.fresh_label(),
            labels.fresh_label(),
            labels.fresh_label(),
            labels.fresh_label(),
        );
        let mut code = MethodCode::new();
        code.add_try_catch_block(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: None,
        });
        code.place_label(start).unwrap();
        code.push_instruction(Instruction::Nop);
        code.push_branch_instruction(BranchInstruction::Goto(exit));
        code.push_instruction(Instruction::Nop);
        code.place_label(end).unwrap();
        code.place_label(exit).unwrap();
        code.push_branch_instruction(BranchInstruction::Return);
        code.place_label(handler).unwrap();
        code.push_branch_instruction(BranchInstruction::AThrow);

        let method = Method::new();
        let code = method
            .assemble(&code, true, &mut ConstantsPool::new())
            .unwrap();

        // nop, goto, athrow, return, athrow
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].start_pc, BytecodeIndex(0));
        assert_eq!(code.exception_table[0].end_pc, BytecodeIndex(4));
        assert_eq!(code.exception_table[0].handler_pc, BytecodeIndex(6));
    }

    #[test]
    fn label_errors() {
        let mut labels = LabelGenerator::new();
        let missing = labels.fresh_label();
        let mut code = MethodCode::new();
        code.place_label(missing).unwrap();
        assert!(matches!(
            code.place_label(missing),
            Err(Error::DuplicateLabel(_))
        ));

        let mut code = MethodCode::new();
        code.push_branch_instruction(BranchInstruction::Goto(labels.fresh_label()));
        assert!(matches!(
            Method::new().assemble(&code, true, &mut ConstantsPool::new()),
            Err(Error::UnplacedLabel(_))
        ));
    }

    #[test]
    fn verification_errors_name_the_method() {
        let mut code = MethodCode::new();
        code.push_instruction(Instruction::Pop);
        code.push_branch_instruction(BranchInstruction::Return);
        match Method::new().assemble(&code, true, &mut ConstantsPool::new()) {
            Err(Error::VerificationImpossible {
                method,
                instruction: 0,
                kind: VerifierErrorKind::EmptyStack,
            }) => assert_eq!(method, "Foo.format()V"),
            other => panic!("expected verification failure, got {:?}", other),
        }
    }
}
