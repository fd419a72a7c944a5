use super::*;
use crate::jvm::class_file::{BytecodeIndex, ClassConstantIndex, ConstantsPool, StackMapFrame};
use crate::jvm::code::{BranchInstruction, ConstantData, Instruction, InvokeType};
use crate::jvm::{
    BinaryName, ConstantPoolOverflow, FieldType, MethodDescriptor, RefType, UnqualifiedName,
    VerifierErrorKind,
};
use crate::util::Width;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals hold one entry per slot: a `long` or `double` is followed by a `Top` for its second
/// half. The stack holds one entry per value. Stack map frames in the class file list locals
/// one entry per value, see [`Frame::compact_locals`] and [`Frame::from_compact`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: Vec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: Vec<VerificationType<Cls, U>>,
}

/// Frame used during analysis, with `Uninitialized` pointing at the index of the `new`
pub type AnalysisFrame = Frame<RefType<BinaryName>, usize>;

impl<Cls, U> Default for Frame<Cls, U> {
    fn default() -> Self {
        Frame {
            locals: vec![],
            stack: vec![],
        }
    }
}

impl<U> Frame<RefType<BinaryName>, U> {
    /// Frame on entry to a method
    pub fn initial(
        this_class: &BinaryName,
        method_name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
        is_static: bool,
    ) -> Self {
        let mut locals = vec![];
        if !is_static {
            if *method_name == UnqualifiedName::INIT && *this_class != BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(RefType::Object(this_class.clone())));
            }
        }
        for parameter in &descriptor.parameters {
            let vtype = VerificationType::from(parameter.clone());
            let is_wide = vtype.width() == 2;
            locals.push(vtype);
            if is_wide {
                locals.push(VerificationType::Top);
            }
        }
        Frame {
            locals,
            stack: vec![],
        }
    }
}

impl<Cls: Clone, U: Clone> Frame<Cls, U> {
    /// Build a frame from locals listed one entry per value
    pub fn from_compact(
        locals: Vec<VerificationType<Cls, U>>,
        stack: Vec<VerificationType<Cls, U>>,
    ) -> Frame<Cls, U> {
        let mut expanded = Vec::with_capacity(locals.len());
        for local in locals {
            let is_wide = local.width() == 2;
            expanded.push(local);
            if is_wide {
                expanded.push(VerificationType::Top);
            }
        }
        Frame {
            locals: expanded,
            stack,
        }
    }

    /// Locals listed one entry per value (dropping the `Top` after wide values)
    pub fn compact_locals(&self) -> Vec<VerificationType<Cls, U>> {
        let mut compact = vec![];
        let mut slot = 0;
        while let Some(local) = self.locals.get(slot) {
            compact.push(local.clone());
            slot += local.width();
        }
        compact
    }

    /// Number of words on the stack
    pub fn stack_width(&self) -> usize {
        self.stack.iter().map(Width::width).sum()
    }
}

impl AnalysisFrame {
    fn push(&mut self, vtype: AnalysisType) {
        self.stack.push(vtype);
    }

    fn pop(&mut self) -> Result<AnalysisType, VerifierErrorKind> {
        self.stack.pop().ok_or(VerifierErrorKind::EmptyStack)
    }

    fn pop_n(&mut self, n: usize) -> Result<(), VerifierErrorKind> {
        for _ in 0..n {
            self.pop()?;
        }
        Ok(())
    }

    /// Pop values adding up to exactly `words` words (top of the stack last)
    fn pop_words(&mut self, words: usize) -> Result<Vec<AnalysisType>, VerifierErrorKind> {
        let mut popped = vec![];
        let mut total = 0;
        while total < words {
            let vtype = self.pop()?;
            total += vtype.width();
            popped.push(vtype);
        }
        if total != words {
            return Err(VerifierErrorKind::InvalidWidth(total));
        }
        popped.reverse();
        Ok(popped)
    }

    fn push_all(&mut self, values: &[AnalysisType]) {
        self.stack.extend_from_slice(values);
    }

    /// Read a reference-holding local
    fn load(&self, slot: u16, strict: bool) -> Result<AnalysisType, VerifierErrorKind> {
        match self.locals.get(slot as usize) {
            Some(VerificationType::Top) | None if strict => {
                Err(VerifierErrorKind::InvalidLocal(slot))
            }
            Some(vtype) => Ok(vtype.clone()),
            None => Ok(VerificationType::Top),
        }
    }

    fn store(&mut self, slot: u16, vtype: AnalysisType) {
        let slot = slot as usize;
        let width = vtype.width();
        if self.locals.len() < slot + width {
            self.locals.resize(slot + width, VerificationType::Top);
        }

        // Overwriting the second half of a wide value kills the first half
        if slot > 0 && self.locals[slot - 1].width() == 2 {
            self.locals[slot - 1] = VerificationType::Top;
        }
        if width == 2 {
            self.locals[slot + 1] = VerificationType::Top;
        }
        self.locals[slot] = vtype;
    }

    /// Swap every occurrence of an uninitialized type for the initialized one
    fn initialize(&mut self, uninitialized: &AnalysisType, initialized: AnalysisType) {
        for vtype in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if vtype == uninitialized {
                *vtype = initialized.clone();
            }
        }
    }

    /// Update the frame to reflect the effects of a non-branching instruction
    ///
    /// Operand types are not checked, only the shape of the stack and the types that flow into
    /// locals and out of instructions.
    pub fn execute_instruction(
        &mut self,
        instruction: &Instruction,
        index: usize,
        this_class: &BinaryName,
        strict: bool,
    ) -> Result<(), VerifierErrorKind> {
        use Instruction::*;
        use VerificationType::{Double, Float, Integer, Long, Null, Object};

        match instruction {
            Nop => (),
            AConstNull => self.push(Null),
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
            | SiPush(_) => self.push(Integer),
            LConst0 | LConst1 => self.push(Long),
            FConst0 | FConst1 | FConst2 => self.push(Float),
            DConst0 | DConst1 => self.push(Double),
            Ldc(constant) => self.push(constant_type(constant)),

            ILoad(_) => self.push(Integer),
            LLoad(_) => self.push(Long),
            FLoad(_) => self.push(Float),
            DLoad(_) => self.push(Double),
            ALoad(slot) => {
                let vtype = self.load(*slot, strict)?;
                self.push(vtype);
            }

            IALoad | BALoad | CALoad | SALoad => {
                self.pop_n(2)?;
                self.push(Integer);
            }
            LALoad => {
                self.pop_n(2)?;
                self.push(Long);
            }
            FALoad => {
                self.pop_n(2)?;
                self.push(Float);
            }
            DALoad => {
                self.pop_n(2)?;
                self.push(Double);
            }
            AALoad => {
                self.pop()?;
                let element = match self.pop()? {
                    Null => Null,
                    Object(array) => match array.element_type() {
                        Some(FieldType::Ref(element)) => Object(element),
                        _ if strict => return Err(VerifierErrorKind::NotArrayType),
                        _ => VerificationType::Top,
                    },
                    _ if strict => return Err(VerifierErrorKind::NotArrayType),
                    _ => VerificationType::Top,
                };
                self.push(element);
            }

            IStore(slot) => {
                self.pop()?;
                self.store(*slot, Integer);
            }
            LStore(slot) => {
                self.pop()?;
                self.store(*slot, Long);
            }
            FStore(slot) => {
                self.pop()?;
                self.store(*slot, Float);
            }
            DStore(slot) => {
                self.pop()?;
                self.store(*slot, Double);
            }
            AStore(slot) => {
                let vtype = self.pop()?;
                self.store(*slot, vtype);
            }

            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                self.pop_n(3)?;
            }

            Pop => {
                self.pop_words(1)?;
            }
            Pop2 => {
                self.pop_words(2)?;
            }
            Dup => {
                let value = self.pop_words(1)?;
                self.push_all(&value);
                self.push_all(&value);
            }
            DupX1 => {
                let value1 = self.pop_words(1)?;
                let value2 = self.pop_words(1)?;
                self.push_all(&value1);
                self.push_all(&value2);
                self.push_all(&value1);
            }
            DupX2 => {
                let value1 = self.pop_words(1)?;
                let value2 = self.pop_words(2)?;
                self.push_all(&value1);
                self.push_all(&value2);
                self.push_all(&value1);
            }
            Dup2 => {
                let value = self.pop_words(2)?;
                self.push_all(&value);
                self.push_all(&value);
            }
            Dup2X1 => {
                let value1 = self.pop_words(2)?;
                let value2 = self.pop_words(1)?;
                self.push_all(&value1);
                self.push_all(&value2);
                self.push_all(&value1);
            }
            Dup2X2 => {
                let value1 = self.pop_words(2)?;
                let value2 = self.pop_words(2)?;
                self.push_all(&value1);
                self.push_all(&value2);
                self.push_all(&value1);
            }
            Swap => {
                let value1 = self.pop_words(1)?;
                let value2 = self.pop_words(1)?;
                self.push_all(&value1);
                self.push_all(&value2);
            }

            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) | LCmp | FCmp(_)
            | DCmp(_) => {
                self.pop_n(2)?;
                self.push(Integer);
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor | LSh(_) => {
                self.pop_n(2)?;
                self.push(Long);
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                self.pop_n(2)?;
                self.push(Float);
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                self.pop_n(2)?;
                self.push(Double);
            }

            INeg | L2I | F2I | D2I | I2B | I2C | I2S | ArrayLength | InstanceOf(_) => {
                self.pop()?;
                self.push(Integer);
            }
            LNeg | I2L | F2L | D2L => {
                self.pop()?;
                self.push(Long);
            }
            FNeg | I2F | L2F | D2F => {
                self.pop()?;
                self.push(Float);
            }
            DNeg | I2D | L2D | F2D => {
                self.pop()?;
                self.push(Double);
            }
            IInc(_, _) => (),

            GetStatic(field) => self.push(VerificationType::from(field.descriptor.clone())),
            PutStatic(_) => {
                self.pop()?;
            }
            GetField(field) => {
                self.pop()?;
                self.push(VerificationType::from(field.descriptor.clone()));
            }
            PutField(_) => {
                self.pop_n(2)?;
            }

            Invoke(invoke_type, method) => {
                self.pop_n(method.descriptor.parameters.len())?;
                if *invoke_type != InvokeType::Static {
                    let receiver = self.pop()?;
                    if method.name == UnqualifiedName::INIT {
                        let initialized = match receiver {
                            VerificationType::UninitializedThis => {
                                RefType::Object(this_class.clone())
                            }
                            VerificationType::Uninitialized(_) => method.owner.clone(),
                            _ => return Err(VerifierErrorKind::InvalidConstructorCall),
                        };
                        self.initialize(&receiver, Object(initialized));
                    }
                }
                if let Some(return_type) = &method.descriptor.return_type {
                    self.push(VerificationType::from(return_type.clone()));
                }
            }
            InvokeDynamic(call_site) => {
                self.pop_n(call_site.descriptor.parameters.len())?;
                if let Some(return_type) = &call_site.descriptor.return_type {
                    self.push(VerificationType::from(return_type.clone()));
                }
            }

            New(_) => self.push(VerificationType::Uninitialized(index)),
            NewArray(element_type) => {
                self.pop()?;
                self.push(Object(RefType::array(FieldType::Base(*element_type))));
            }
            ANewArray(element_type) => {
                self.pop()?;
                self.push(Object(RefType::array(FieldType::Ref(element_type.clone()))));
            }
            CheckCast(ref_type) => {
                self.pop()?;
                self.push(Object(ref_type.clone()));
            }
            MonitorEnter | MonitorExit => {
                self.pop()?;
            }
            MultiANewArray(ref_type, dimensions) => {
                self.pop_n(*dimensions as usize)?;
                self.push(Object(ref_type.clone()));
            }
        }

        Ok(())
    }

    /// Update the frame to reflect the operands consumed by a branching instruction
    ///
    /// `jsr` and `ret` only have a meaning outside of strict mode: `jsr` leaves the frame
    /// untouched (the subroutine target additionally sees a return address on the stack).
    pub fn execute_branch<Lbl>(
        &mut self,
        instruction: &BranchInstruction<Lbl>,
        strict: bool,
    ) -> Result<(), VerifierErrorKind> {
        use BranchInstruction::*;

        match instruction {
            If(_, _) | IfNull(_, _) => {
                self.pop()?;
            }
            IfICmp(_, _) | IfACmp(_, _) => {
                self.pop_n(2)?;
            }
            Goto(_) | Return => (),
            Jsr(_) | Ret(_) if strict => return Err(VerifierErrorKind::Subroutine),
            Jsr(_) | Ret(_) => (),
            TableSwitch { .. } | LookupSwitch { .. } => {
                self.pop()?;
            }
            IReturn | LReturn | FReturn | DReturn | AReturn | AThrow => {
                self.pop()?;
            }
        }
        Ok(())
    }

    /// Resolve the frame into its serializable form
    ///
    /// `offsets` maps instruction indices to bytecode offsets.
    pub fn into_serializable(
        &self,
        constants: &mut ConstantsPool,
        offsets: &[usize],
    ) -> Result<Frame<ClassConstantIndex, BytecodeIndex>, ConstantPoolOverflow> {
        let mut serialize = |vtype: &AnalysisType| {
            vtype.try_map(
                |ref_type| constants.get_ref_type(ref_type).map(ClassConstantIndex),
                |index| Ok(BytecodeIndex(offsets[*index] as u16)),
            )
        };
        let locals = self
            .compact_locals()
            .iter()
            .map(&mut serialize)
            .collect::<Result<_, _>>()?;
        let stack = self
            .stack
            .iter()
            .map(&mut serialize)
            .collect::<Result<_, _>>()?;
        Ok(Frame { locals, stack })
    }
}

/// Type pushed by an `ldc`
fn constant_type(constant: &ConstantData) -> AnalysisType {
    let object = |name: BinaryName| VerificationType::Object(RefType::Object(name));
    match constant {
        ConstantData::Integer(_) => VerificationType::Integer,
        ConstantData::Float(_) => VerificationType::Float,
        ConstantData::Long(_) => VerificationType::Long,
        ConstantData::Double(_) => VerificationType::Double,
        ConstantData::String(_) => object(BinaryName::STRING),
        ConstantData::Class(_) => object(BinaryName::CLASS),
        ConstantData::MethodType(_) => object(BinaryName::METHODTYPE),
        ConstantData::MethodHandle(_, _) => object(BinaryName::METHODHANDLE),
        ConstantData::Dynamic(dynamic) => VerificationType::from(dynamic.descriptor.clone()),
    }
}

/// Frames as they get written to a `StackMapTable`, locals listed one entry per value
impl Frame<ClassConstantIndex, BytecodeIndex> {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none
    /// of the other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        let this_len = self.locals.len();
        let prev_len = previous_frame.locals.len();

        match self.stack.as_slice() {
            [] if this_len <= prev_len && prev_len - this_len < 4 => {
                if previous_frame.locals.starts_with(&self.locals) {
                    let chopped_k = (prev_len - this_len) as u8;
                    return if chopped_k == 0 {
                        StackMapFrame::SameLocalsNoStack { offset_delta }
                    } else {
                        StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k,
                        }
                    };
                }
            }
            [] if this_len > prev_len && this_len - prev_len < 4 => {
                if self.locals.starts_with(&previous_frame.locals) {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: self.locals[prev_len..].to_vec(),
                    };
                }
            }
            [single] if self.locals == previous_frame.locals => {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: single.clone(),
                };
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.clone(),
            locals: self.locals.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;
    use crate::jvm::code::{FieldRef, MethodRef};
    use crate::jvm::descriptors::ParseDescriptor;
    use crate::jvm::Name;

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    fn object(class_name: &str) -> AnalysisType {
        VerificationType::Object(RefType::Object(name(class_name)))
    }

    fn run(frame: &mut AnalysisFrame, instructions: &[Instruction]) -> Result<(), VerifierErrorKind> {
        for (index, instruction) in instructions.iter().enumerate() {
            frame.execute_instruction(instruction, index, &name("Foo"), true)?;
        }
        Ok(())
    }

    #[test]
    fn initial_frames() {
        let descriptor = MethodDescriptor::parse("(JLjava/lang/String;)V").unwrap();
        let frame: AnalysisFrame =
            Frame::initial(&name("Foo"), &UnqualifiedName::INIT, &descriptor, false);
        assert_eq!(
            frame.locals,
            vec![
                VerificationType::UninitializedThis,
                VerificationType::Long,
                VerificationType::Top,
                object("java/lang/String"),
            ]
        );
        assert_eq!(
            frame.compact_locals(),
            vec![
                VerificationType::UninitializedThis,
                VerificationType::Long,
                object("java/lang/String"),
            ]
        );

        let frame: AnalysisFrame =
            Frame::initial(&BinaryName::OBJECT, &UnqualifiedName::INIT, &descriptor, false);
        assert_eq!(frame.locals[0], object("java/lang/Object"));

        let frame: AnalysisFrame = Frame::initial(
            &name("Foo"),
            &UnqualifiedName::CLINIT,
            &MethodDescriptor::parse("()V").unwrap(),
            true,
        );
        assert!(frame.locals.is_empty());
    }

    #[test]
    fn constructor_call_initializes_every_copy() {
        let mut frame = AnalysisFrame::default();
        let init = MethodRef {
            owner: RefType::Object(name("java/lang/StringBuilder")),
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor::parse("()V").unwrap(),
            is_interface: false,
        };
        run(
            &mut frame,
            &[
                Instruction::New(RefType::Object(name("java/lang/StringBuilder"))),
                Instruction::Dup,
                Instruction::Dup,
                Instruction::AStore(1),
                Instruction::Invoke(InvokeType::Special, init),
            ],
        )
        .unwrap();
        assert_eq!(frame.stack, vec![object("java/lang/StringBuilder")]);
        assert_eq!(
            frame.locals,
            vec![VerificationType::Top, object("java/lang/StringBuilder")]
        );
    }

    #[test]
    fn dup_forms_follow_widths() {
        let mut frame = AnalysisFrame::default();
        run(&mut frame, &[Instruction::LConst0, Instruction::IConst0, Instruction::DupX2]).unwrap();
        assert_eq!(
            frame.stack,
            vec![
                VerificationType::Integer,
                VerificationType::Long,
                VerificationType::Integer
            ]
        );
        assert_eq!(frame.stack_width(), 4);

        let mut frame = AnalysisFrame::default();
        assert!(matches!(
            run(&mut frame, &[Instruction::LConst0, Instruction::Dup]),
            Err(VerifierErrorKind::InvalidWidth(2))
        ));

        let mut frame = AnalysisFrame::default();
        assert!(matches!(
            run(&mut frame, &[Instruction::IConst0, Instruction::Pop2]),
            Err(VerifierErrorKind::EmptyStack)
        ));
    }

    #[test]
    fn stores_clobber_wide_locals() {
        let mut frame = AnalysisFrame::default();
        run(
            &mut frame,
            &[
                Instruction::LConst1,
                Instruction::LStore(0),
                Instruction::IConst0,
                Instruction::IStore(1),
            ],
        )
        .unwrap();
        assert_eq!(
            frame.locals,
            vec![VerificationType::Top, VerificationType::Integer]
        );

        let mut frame = AnalysisFrame::default();
        assert!(matches!(
            run(&mut frame, &[Instruction::ALoad(3)]),
            Err(VerifierErrorKind::InvalidLocal(3))
        ));
    }

    #[test]
    fn field_and_array_types() {
        let mut frame = AnalysisFrame::default();
        frame.locals.push(object("Foo"));
        let substitute = FieldRef {
            owner: name("Foo"),
            name: UnqualifiedName::from_string(String::from("substitute")).unwrap(),
            descriptor: FieldType::boolean(),
        };
        run(
            &mut frame,
            &[
                Instruction::ALoad(0),
                Instruction::GetField(substitute),
                Instruction::ANewArray(RefType::Object(name("java/lang/String"))),
                Instruction::IConst0,
                Instruction::AALoad,
            ],
        )
        .unwrap();
        assert_eq!(frame.stack, vec![object("java/lang/String")]);

        let mut frame = AnalysisFrame::default();
        assert!(matches!(
            run(
                &mut frame,
                &[
                    Instruction::IConst1,
                    Instruction::NewArray(crate::jvm::BaseType::Int),
                    Instruction::IConst0,
                    Instruction::AALoad,
                ]
            ),
            Err(VerifierErrorKind::NotArrayType)
        ));
    }

    #[test]
    fn compressed_frame_forms() {
        let class = |idx| VerificationType::Object(ClassConstantIndex(ConstantIndex(idx)));
        let frame = |locals: Vec<_>, stack: Vec<_>| Frame { locals, stack };

        let previous = frame(vec![class(1), VerificationType::Integer], vec![]);
        assert_eq!(
            frame(vec![class(1), VerificationType::Integer], vec![]).stack_map_frame(3, &previous),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );
        assert_eq!(
            frame(vec![class(1)], vec![]).stack_map_frame(3, &previous),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 3,
                chopped_k: 1
            }
        );
        assert_eq!(
            frame(
                vec![class(1), VerificationType::Integer, VerificationType::Long],
                vec![]
            )
            .stack_map_frame(3, &previous),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 3,
                locals: vec![VerificationType::Long]
            }
        );
        assert_eq!(
            frame(vec![class(1), VerificationType::Integer], vec![class(2)])
                .stack_map_frame(3, &previous),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 3,
                stack: class(2)
            }
        );
        assert!(matches!(
            frame(vec![class(2)], vec![]).stack_map_frame(3, &previous),
            StackMapFrame::Full { .. }
        ));
    }
}
