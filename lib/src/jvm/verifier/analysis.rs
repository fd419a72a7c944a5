use super::*;
use crate::jvm::class_graph::ClassGraph;
use crate::jvm::code::{AnyInstruction, BranchInstruction, Instruction};
use crate::jvm::{
    BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName, VerifierErrorKind,
};
use crate::util::Width;
use std::collections::HashMap;

/// What the analysis needs to know about the method being analyzed
pub struct MethodContext<'a> {
    pub this_class: &'a BinaryName,
    pub name: &'a UnqualifiedName,
    pub descriptor: &'a MethodDescriptor<BinaryName>,
    pub is_static: bool,

    /// Reject code that only the old type-inferencing verifier accepts
    ///
    /// This is on for classes that carry stack map frames. With it on, subroutines are rejected
    /// and stack entries that can not be merged are an error (instead of becoming unusable).
    pub strict: bool,
    pub graph: &'a ClassGraph,
}

/// Exception handler, with instruction indices for the range and handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handler {
    pub start: usize,
    pub end: usize,
    pub handler: usize,

    /// `None` catches everything
    pub catch_type: Option<BinaryName>,
}

impl Handler {
    fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Outcome of analyzing a method body
#[derive(Debug)]
pub struct FrameAnalysis {
    /// Frame on entry to each instruction (`None` for unreachable instructions)
    pub frames: Vec<Option<AnalysisFrame>>,
    pub max_stack: usize,
}

/// Compute the frame on entry to every reachable instruction
///
/// Jump targets are instruction indices. `hints` are frames found in the original code, indexed
/// by instruction: when two different reference types meet, the hint's type is preferred over a
/// computed common superclass. On failure, the error carries the index of the instruction where
/// the problem was detected.
pub fn analyze<U>(
    instructions: &[AnyInstruction<usize>],
    handlers: &[Handler],
    hints: &HashMap<usize, Frame<RefType<BinaryName>, U>>,
    context: &MethodContext<'_>,
) -> Result<FrameAnalysis, (usize, VerifierErrorKind)> {
    let len = instructions.len();
    let mut frames: Vec<Option<AnalysisFrame>> = vec![None; len];
    let mut queued = vec![false; len];
    let mut worklist = vec![];
    let mut max_stack = 0;

    if len == 0 {
        return Err((0, VerifierErrorKind::FallsOffEnd));
    }
    frames[0] = Some(Frame::initial(
        context.this_class,
        context.name,
        context.descriptor,
        context.is_static,
    ));
    worklist.push(0);
    queued[0] = true;

    while let Some(index) = worklist.pop() {
        queued[index] = false;
        let frame = match &frames[index] {
            Some(frame) => frame.clone(),
            None => continue,
        };
        max_stack = max_stack.max(frame.stack_width());

        let successors =
            successors(instructions, index, &frame, context).map_err(|kind| (index, kind))?;

        let mut outgoing = vec![];

        // Handlers see the locals from before and after the instruction
        for handler in handlers.iter().filter(|handler| handler.covers(index)) {
            let catch_type = handler.catch_type.clone().unwrap_or(BinaryName::THROWABLE);
            let stack = vec![VerificationType::Object(RefType::Object(catch_type))];
            if let (AnyInstruction::Regular(_), Some((_, after))) =
                (&instructions[index], successors.first())
            {
                outgoing.push((
                    handler.handler,
                    Frame {
                        locals: after.locals.clone(),
                        stack: stack.clone(),
                    },
                ));
            }
            outgoing.push((
                handler.handler,
                Frame {
                    locals: frame.locals.clone(),
                    stack,
                },
            ));
        }

        for (target, target_frame) in successors {
            if target >= len {
                return Err((index, VerifierErrorKind::FallsOffEnd));
            }
            max_stack = max_stack.max(target_frame.stack_width());
            outgoing.push((target, target_frame));
        }

        for (target, incoming) in outgoing {
            let merged = match &frames[target] {
                None => normalize(incoming),
                Some(current) => merge_frames(current, &incoming, hints.get(&target), context)
                    .map_err(|kind| (target, kind))?,
            };
            if frames[target].as_ref() != Some(&merged) {
                frames[target] = Some(merged);
                if !queued[target] {
                    queued[target] = true;
                    worklist.push(target);
                }
            }
        }
    }

    Ok(FrameAnalysis { frames, max_stack })
}

/// Frames flowing out of an instruction, along with where they flow
fn successors(
    instructions: &[AnyInstruction<usize>],
    index: usize,
    frame: &AnalysisFrame,
    context: &MethodContext<'_>,
) -> Result<Vec<(usize, AnalysisFrame)>, VerifierErrorKind> {
    let mut after = frame.clone();
    let successors = match &instructions[index] {
        AnyInstruction::Regular(instruction) => {
            after.execute_instruction(instruction, index, context.this_class, context.strict)?;
            vec![(index + 1, after)]
        }
        AnyInstruction::Branch(BranchInstruction::Jsr(target)) if !context.strict => {
            let mut subroutine = after.clone();
            subroutine.stack.push(VerificationType::Top);
            vec![(*target, subroutine), (index + 1, after)]
        }
        AnyInstruction::Branch(branch) => {
            after.execute_branch(branch, context.strict)?;
            let mut successors: Vec<(usize, AnalysisFrame)> = branch
                .jump_targets()
                .into_iter()
                .map(|target| (*target, after.clone()))
                .collect();
            if branch.falls_through() {
                successors.push((index + 1, after));
            }
            successors
        }
    };
    Ok(successors)
}

/// Merge an incoming frame into the frame already recorded for an instruction
fn merge_frames<U>(
    current: &AnalysisFrame,
    incoming: &AnalysisFrame,
    hint: Option<&Frame<RefType<BinaryName>, U>>,
    context: &MethodContext<'_>,
) -> Result<AnalysisFrame, VerifierErrorKind> {
    if current.stack.len() != incoming.stack.len() {
        return Err(VerifierErrorKind::IncompatibleStackHeights(
            current.stack.len(),
            incoming.stack.len(),
        ));
    }

    let mut stack = Vec::with_capacity(current.stack.len());
    for (idx, (left, right)) in current.stack.iter().zip(&incoming.stack).enumerate() {
        let hint_type = hint_object(hint.map(|hint| hint.stack.as_slice()), idx);
        match merge_types(left, right, hint_type, context.graph) {
            Some(merged) => stack.push(merged),
            None if context.strict => {
                return Err(VerifierErrorKind::IncompatibleTypes(
                    format!("{:?}", left),
                    format!("{:?}", right),
                ))
            }
            None => stack.push(VerificationType::Top),
        }
    }

    let locals = current
        .locals
        .iter()
        .zip(&incoming.locals)
        .enumerate()
        .map(|(idx, (left, right))| {
            let hint_type = hint_object(hint.map(|hint| hint.locals.as_slice()), idx);
            merge_types(left, right, hint_type, context.graph).unwrap_or(VerificationType::Top)
        })
        .collect();

    Ok(normalize(Frame { locals, stack }))
}

/// Reference type at some position of a hint frame
fn hint_object<U>(
    types: Option<&[VerificationType<RefType<BinaryName>, U>]>,
    idx: usize,
) -> Option<&RefType<BinaryName>> {
    match types.and_then(|types| types.get(idx)) {
        Some(VerificationType::Object(ref_type)) => Some(ref_type),
        _ => None,
    }
}

/// Make sure wide locals are still followed by their second half, and drop trailing `Top`s
fn normalize(mut frame: AnalysisFrame) -> AnalysisFrame {
    for slot in 0..frame.locals.len() {
        let second_half = frame.locals.get(slot + 1);
        if frame.locals[slot].width() == 2 && second_half != Some(&VerificationType::Top) {
            frame.locals[slot] = VerificationType::Top;
        }
    }
    while let [.., before, VerificationType::Top] = frame.locals.as_slice() {
        if before.width() == 2 {
            break;
        }
        frame.locals.pop();
    }
    if frame.locals == [VerificationType::Top] {
        frame.locals.clear();
    }
    frame
}

/// Least upper bound of two verification types, if there is a usable one
fn merge_types(
    left: &AnalysisType,
    right: &AnalysisType,
    hint: Option<&RefType<BinaryName>>,
    graph: &ClassGraph,
) -> Option<AnalysisType> {
    match (left, right) {
        _ if left == right => Some(left.clone()),
        (VerificationType::Null, VerificationType::Object(_)) => Some(right.clone()),
        (VerificationType::Object(_), VerificationType::Null) => Some(left.clone()),
        (VerificationType::Object(left), VerificationType::Object(right)) => {
            let merged = match hint {
                Some(hint) => hint.clone(),
                None => merge_ref_types(left, right, graph),
            };
            Some(VerificationType::Object(merged))
        }
        _ => None,
    }
}

fn merge_ref_types(
    left: &RefType<BinaryName>,
    right: &RefType<BinaryName>,
    graph: &ClassGraph,
) -> RefType<BinaryName> {
    if left == right {
        return left.clone();
    }
    match (left, right) {
        (RefType::Object(left), RefType::Object(right)) => {
            RefType::Object(graph.common_superclass(left, right))
        }
        _ => match (left.element_type(), right.element_type()) {
            (Some(FieldType::Ref(left)), Some(FieldType::Ref(right))) => {
                RefType::array(FieldType::Ref(merge_ref_types(&left, &right, graph)))
            }
            _ => RefType::Object(BinaryName::OBJECT),
        },
    }
}

/// Largest local variable slot used, given the instructions and parameters
pub fn max_locals<Lbl>(
    instructions: &[AnyInstruction<Lbl>],
    descriptor: &MethodDescriptor<BinaryName>,
    is_static: bool,
) -> usize {
    use Instruction::*;

    let parameters = descriptor.parameter_length(!is_static);
    instructions
        .iter()
        .map(|instruction| match instruction {
            AnyInstruction::Regular(
                ILoad(slot) | FLoad(slot) | ALoad(slot) | IStore(slot) | FStore(slot)
                | AStore(slot) | IInc(slot, _),
            )
            | AnyInstruction::Branch(BranchInstruction::Ret(slot)) => *slot as usize + 1,
            AnyInstruction::Regular(LLoad(slot) | DLoad(slot) | LStore(slot) | DStore(slot)) => {
                *slot as usize + 2
            }
            _ => 0,
        })
        .fold(parameters, usize::max)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{EqComparison, FieldRef, OrdComparison};
    use crate::jvm::descriptors::ParseDescriptor;
    use crate::jvm::Name;

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    fn object(class_name: &str) -> AnalysisType {
        VerificationType::Object(RefType::Object(name(class_name)))
    }

    fn regular(instruction: Instruction) -> AnyInstruction<usize> {
        AnyInstruction::Regular(instruction)
    }

    fn branch(instruction: BranchInstruction<usize>) -> AnyInstruction<usize> {
        AnyInstruction::Branch(instruction)
    }

    struct Method {
        this_class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
        graph: ClassGraph,
    }

    impl Method {
        fn new(descriptor: &str) -> Method {
            Method {
                this_class: name("Foo"),
                name: UnqualifiedName::from_string(String::from("format")).unwrap(),
                descriptor: MethodDescriptor::parse(descriptor).unwrap(),
                graph: ClassGraph::with_java_library_types(),
            }
        }

        fn analyze(
            &self,
            instructions: &[AnyInstruction<usize>],
            handlers: &[Handler],
            strict: bool,
        ) -> Result<FrameAnalysis, (usize, VerifierErrorKind)> {
            let context = MethodContext {
                this_class: &self.this_class,
                name: &self.name,
                descriptor: &self.descriptor,
                is_static: false,
                strict,
                graph: &self.graph,
            };
            analyze(instructions, handlers, &HashMap::<usize, AnalysisFrame>::new(), &context)
        }
    }

    fn substitute() -> FieldRef {
        FieldRef {
            owner: name("Foo"),
            name: UnqualifiedName::from_string(String::from("substitute")).unwrap(),
            descriptor: FieldType::boolean(),
        }
    }

    #[test]
    fn code_after_goto_is_unreachable() {
        let method = Method::new("()V");
        let instructions = vec![
            regular(Instruction::ALoad(0)),
            regular(Instruction::GetField(substitute())),
            branch(BranchInstruction::If(OrdComparison::EQ, 5)),
            branch(BranchInstruction::Goto(5)),
            regular(Instruction::Nop),
            branch(BranchInstruction::Return),
        ];
        let analysis = method.analyze(&instructions, &[], true).unwrap();
        assert!(analysis.frames[4].is_none());
        assert_eq!(
            analysis.frames[5],
            Some(Frame {
                locals: vec![object("Foo")],
                stack: vec![]
            })
        );
        assert_eq!(analysis.max_stack, 1);
    }

    #[test]
    fn normalized_wide_locals() {
        let frame = |locals: Vec<AnalysisType>| Frame {
            locals,
            stack: vec![],
        };

        // Half a `long` is unusable
        assert_eq!(
            normalize(frame(vec![
                object("Foo"),
                VerificationType::Long,
                VerificationType::Integer
            ])),
            frame(vec![
                object("Foo"),
                VerificationType::Top,
                VerificationType::Integer
            ])
        );

        // Trailing `Top`s go, unless they complete a `long`
        assert_eq!(
            normalize(frame(vec![
                object("Foo"),
                VerificationType::Long,
                VerificationType::Top
            ])),
            frame(vec![
                object("Foo"),
                VerificationType::Long,
                VerificationType::Top
            ])
        );
        assert_eq!(
            normalize(frame(vec![
                object("Foo"),
                VerificationType::Integer,
                VerificationType::Top,
                VerificationType::Top
            ])),
            frame(vec![object("Foo"), VerificationType::Integer])
        );
    }

    #[test]
    fn merged_references_use_common_superclass() {
        let method = Method::new(
            "(Ljava/lang/IllegalStateException;Ljava/lang/IllegalArgumentException;)\
             Ljava/lang/Object;",
        );
        let instructions = vec![
            regular(Instruction::ALoad(1)),
            branch(BranchInstruction::IfNull(EqComparison::EQ, 4)),
            regular(Instruction::ALoad(1)),
            branch(BranchInstruction::Goto(6)),
            regular(Instruction::ALoad(2)),
            branch(BranchInstruction::Goto(6)),
            branch(BranchInstruction::AReturn),
        ];
        let analysis = method.analyze(&instructions, &[], true).unwrap();
        let merged = analysis.frames[6].as_ref().unwrap();
        assert_eq!(merged.stack, vec![object("java/lang/RuntimeException")]);
    }

    #[test]
    fn mismatched_locals_become_top() {
        let method = Method::new("()V");
        let instructions = vec![
            regular(Instruction::IConst0),
            branch(BranchInstruction::If(OrdComparison::EQ, 5)),
            regular(Instruction::IConst1),
            regular(Instruction::IStore(1)),
            branch(BranchInstruction::Goto(7)),
            regular(Instruction::AConstNull),
            regular(Instruction::AStore(1)),
            branch(BranchInstruction::Return),
        ];
        let analysis = method.analyze(&instructions, &[], true).unwrap();
        assert_eq!(
            analysis.frames[7].as_ref().unwrap().locals,
            vec![object("Foo")]
        );
    }

    #[test]
    fn stack_heights_must_agree() {
        let method = Method::new("()V");
        let instructions = vec![
            regular(Instruction::IConst0),
            branch(BranchInstruction::If(OrdComparison::EQ, 3)),
            regular(Instruction::IConst1),
            branch(BranchInstruction::Return),
        ];
        assert!(matches!(
            method.analyze(&instructions, &[], true),
            Err((3, VerifierErrorKind::IncompatibleStackHeights(_, _)))
        ));
    }

    #[test]
    fn falling_off_the_end() {
        let method = Method::new("()V");
        let instructions = vec![regular(Instruction::Nop)];
        assert!(matches!(
            method.analyze(&instructions, &[], true),
            Err((0, VerifierErrorKind::FallsOffEnd))
        ));
    }

    #[test]
    fn handlers_get_the_catch_type() {
        let method = Method::new("()V");
        let instructions = vec![
            regular(Instruction::IConst0),
            regular(Instruction::IStore(1)),
            branch(BranchInstruction::Return),
            regular(Instruction::AStore(2)),
            branch(BranchInstruction::Return),
        ];
        let handlers = vec![Handler {
            start: 0,
            end: 2,
            handler: 3,
            catch_type: Some(name("java/io/IOException")),
        }];
        let analysis = method.analyze(&instructions, &handlers, true).unwrap();
        let frame = analysis.frames[3].as_ref().unwrap();
        assert_eq!(frame.stack, vec![object("java/io/IOException")]);
        assert_eq!(frame.locals, vec![object("Foo")]);
    }

    #[test]
    fn subroutines_need_lenient_mode() {
        let method = Method::new("()V");
        let instructions = vec![
            branch(BranchInstruction::Jsr(2)),
            branch(BranchInstruction::Return),
            regular(Instruction::AStore(1)),
            branch(BranchInstruction::Ret(1)),
        ];
        assert!(matches!(
            method.analyze(&instructions, &[], true),
            Err((0, VerifierErrorKind::Subroutine))
        ));

        let analysis = method.analyze(&instructions, &[], false).unwrap();
        assert!(analysis.frames.iter().all(Option::is_some));
        assert_eq!(analysis.max_stack, 1);
        assert_eq!(max_locals(&instructions, &method.descriptor, false), 2);
    }
}
