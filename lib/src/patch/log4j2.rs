//! Log4j2 `LiteralPatternConverter` patch
//!
//! `LiteralPatternConverter.format` performs lookups on the literal text whenever the
//! `substitute` flag is set. The patch makes every `if (!substitute)` branch in `format`
//! unconditional, so that the literal always gets appended as-is.

use super::HotPatch;
use crate::jvm::class_graph::ClassGraph;
use crate::jvm::code::{
    BranchInstruction, FieldRef, Instruction, Label, LocalVariable, OrdComparison, TryCatchBlock,
};
use crate::jvm::visitor::{ClassHeader, MethodHeader};
use crate::jvm::{
    BinaryName, ClassReader, ClassVisitor, ClassWriter, Error, FieldType, MethodVisitor, Name,
    RenderDescriptor,
};
use log::{debug, info};

const TARGET_CLASS: &str = "org/apache/logging/log4j/core/pattern/LiteralPatternConverter";
const TARGET_CLASS_DOTTED: &str = "org.apache.logging.log4j.core.pattern.LiteralPatternConverter";
const TARGET_METHOD: &str = "format";
const SUBSTITUTE_FIELD: &str = "substitute";

/// Stop `LiteralPatternConverter` from performing lookups in literal text
#[derive(Debug, Default, Clone, Copy)]
pub struct DisableLiteralPatternConverter;

impl HotPatch for DisableLiteralPatternConverter {
    fn name(&self) -> &'static str {
        "Log4j2_DisableLiteralPatternConverter"
    }

    fn is_target_class(&self, class_name: &str) -> bool {
        class_name.ends_with(TARGET_CLASS) || class_name.ends_with(TARGET_CLASS_DOTTED)
    }

    fn apply(&self, class_bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let reader = ClassReader::new(class_bytes)?;
        let graph = ClassGraph::with_java_library_types();
        let mut writer = ClassWriter::from_reader(&reader, &graph);
        reader.accept(&mut LiteralPatternClassVisitor::new(&mut writer))?;
        writer.into_bytes()
    }
}

/// Wraps the method visitor of every `format` method, passing everything else through
pub struct LiteralPatternClassVisitor<'a> {
    next: &'a mut dyn ClassVisitor,
    class_name: Option<BinaryName>,
}

impl<'a> LiteralPatternClassVisitor<'a> {
    pub fn new(next: &'a mut dyn ClassVisitor) -> Self {
        LiteralPatternClassVisitor {
            next,
            class_name: None,
        }
    }
}

impl ClassVisitor for LiteralPatternClassVisitor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        Some(&mut *self.next)
    }

    fn visit_header(&mut self, header: &ClassHeader) -> Result<(), Error> {
        self.class_name = Some(header.name.clone());
        self.next.visit_header(header)
    }

    fn visit_method<'b>(
        &'b mut self,
        method: &MethodHeader,
    ) -> Result<Option<Box<dyn MethodVisitor + 'b>>, Error> {
        let next = self.next.visit_method(method)?;
        if method.name.as_str() != TARGET_METHOD {
            return Ok(next);
        }

        let method_name = format!(
            "{}.{}{}",
            self.class_name.as_ref().map_or("?", |name| name.as_str()),
            method.name,
            method.descriptor.render()
        );
        debug!("watching {} for branches on `{}`", method_name, SUBSTITUTE_FIELD);
        Ok(next.map(|next| {
            Box::new(LiteralPatternMethodVisitor::new(next, method_name))
                as Box<dyn MethodVisitor + 'b>
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PatternState {
    Clear,

    /// The last instruction loaded the `substitute` flag
    Pending,
}

/// Adds a `goto` after each `ifeq` testing the `substitute` flag
///
/// Every event except placing a label (or a frame at that label) breaks up the pattern.
pub struct LiteralPatternMethodVisitor<'a> {
    next: Box<dyn MethodVisitor + 'a>,
    state: PatternState,
    rewrites: usize,
    method_name: String,
}

impl<'a> LiteralPatternMethodVisitor<'a> {
    pub fn new(next: Box<dyn MethodVisitor + 'a>, method_name: String) -> Self {
        LiteralPatternMethodVisitor {
            next,
            state: PatternState::Clear,
            rewrites: 0,
            method_name,
        }
    }

    /// Number of branches made unconditional so far
    pub fn rewrites(&self) -> usize {
        self.rewrites
    }
}

fn is_substitute_flag(field: &FieldRef) -> bool {
    field.owner.as_str() == TARGET_CLASS
        && field.name.as_str() == SUBSTITUTE_FIELD
        && field.descriptor == FieldType::boolean()
}

impl MethodVisitor for LiteralPatternMethodVisitor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(self.next.as_mut())
    }

    fn visit_code(&mut self) -> Result<(), Error> {
        self.next.visit_code()?;
        self.state = PatternState::Clear;
        Ok(())
    }

    fn visit_try_catch_block(&mut self, block: &TryCatchBlock) -> Result<(), Error> {
        self.next.visit_try_catch_block(block)?;
        self.state = PatternState::Clear;
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<(), Error> {
        self.next.visit_line_number(line, start)?;
        self.state = PatternState::Clear;
        Ok(())
    }

    fn visit_instruction(&mut self, instruction: &Instruction) -> Result<(), Error> {
        self.next.visit_instruction(instruction)?;
        self.state = match instruction {
            Instruction::GetField(field) if is_substitute_flag(field) => PatternState::Pending,
            _ => PatternState::Clear,
        };
        Ok(())
    }

    fn visit_branch_instruction(
        &mut self,
        instruction: &BranchInstruction<Label>,
    ) -> Result<(), Error> {
        self.next.visit_branch_instruction(instruction)?;
        if let (PatternState::Pending, BranchInstruction::If(OrdComparison::EQ, target)) =
            (self.state, instruction)
        {
            self.next
                .visit_branch_instruction(&BranchInstruction::Goto(*target))?;
            self.rewrites += 1;
        }
        self.state = PatternState::Clear;
        Ok(())
    }

    fn visit_local_variable(&mut self, local_variable: &LocalVariable) -> Result<(), Error> {
        self.next.visit_local_variable(local_variable)?;
        self.state = PatternState::Clear;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        if self.rewrites > 0 {
            info!(
                "made {} branch(es) on `{}` unconditional in {}",
                self.rewrites, SUBSTITUTE_FIELD, self.method_name
            );
        } else {
            debug!("no branch on `{}` found in {}", SUBSTITUTE_FIELD, self.method_name);
        }
        self.next.visit_end()
    }
}
