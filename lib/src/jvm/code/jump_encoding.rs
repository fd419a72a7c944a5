//! Lay out a method body, widening jumps that don't fit in 16 bits
//!
//! Most jump instructions have a signed 16-bit relative offset. When the distance to the target
//! is bigger than that, the jump must be rewritten:
//!
//!   - `goto` and `jsr` have wide forms (`goto_w` and `jsr_w`) with a 32-bit offset
//!
//!   - conditional branches have no wide form, so the condition gets inverted to jump over a
//!     `goto_w` to the real target
//!
//! ```text,ignore,no_run
//!     if* L2                ifnot* +8
//! L1: ...         =>        goto_w L2
//!     ...               L1: ...
//! L2: ...               L2: ...
//! ```
//!
//! ### Termination
//!
//! Widening an instruction makes it longer, which can push other jumps out of range (and changes
//! the padding of `tableswitch`/`lookupswitch`). Layout is therefore repeated until no more jumps
//! need widening. This always finishes because instructions only ever go from narrow to wide,
//! never back.

use super::{BranchInstruction, EqComparison, OrdComparison};
use std::ops::{RangeBounds, RangeInclusive};

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Instruction ready for layout
///
/// Jump targets are indices into the instruction list (where the length of the list means the
/// end of the code).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutInstruction {
    /// Already-encoded non-branching instruction
    Encoded(Vec<u8>),
    Branch(BranchInstruction<usize>),
}

/// Result of laying out a method body
#[derive(Debug)]
pub struct Layout {
    pub code: Vec<u8>,

    /// Offset of every instruction, plus a final entry for the end of the code
    pub offsets: Vec<usize>,

    /// Conditional branches that got inverted around a `goto_w`
    ///
    /// The instruction following each of these becomes a jump target.
    pub widened_conditionals: Vec<usize>,
}

/// Pick offsets and encodings for all instructions, then emit the code
///
/// The `small_jump_range` parameter should always be `SIGNED_16BIT_JUMP_RANGE` - it is a
/// parameter only for unit testing purposes.
pub fn lay_out(
    instructions: &[LayoutInstruction],
    small_jump_range: &impl RangeBounds<isize>,
) -> Layout {
    let mut wide = vec![false; instructions.len()];

    let offsets = loop {
        let offsets = compute_offsets(instructions, &wide);
        let mut changed = false;
        for (idx, instruction) in instructions.iter().enumerate() {
            if wide[idx] {
                continue;
            }
            if let LayoutInstruction::Branch(branch) = instruction {
                if let Some(target) = single_target(branch) {
                    let distance = offsets[target] as isize - offsets[idx] as isize;
                    if !small_jump_range.contains(&distance) {
                        wide[idx] = true;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break offsets;
        }
    };

    let mut code = Vec::with_capacity(offsets[instructions.len()]);
    let mut widened_conditionals = vec![];
    for (idx, instruction) in instructions.iter().enumerate() {
        match instruction {
            LayoutInstruction::Encoded(bytes) => code.extend_from_slice(bytes),
            LayoutInstruction::Branch(branch) => {
                if wide[idx] && branch.is_conditional() {
                    widened_conditionals.push(idx);
                }
                emit_branch(branch, idx, wide[idx], &offsets, &mut code);
            }
        }
    }
    debug_assert_eq!(code.len(), offsets[instructions.len()]);

    Layout {
        code,
        offsets,
        widened_conditionals,
    }
}

/// Branches whose offset might need widening
fn single_target(branch: &BranchInstruction<usize>) -> Option<usize> {
    match branch {
        BranchInstruction::If(_, target)
        | BranchInstruction::IfICmp(_, target)
        | BranchInstruction::IfACmp(_, target)
        | BranchInstruction::IfNull(_, target)
        | BranchInstruction::Goto(target)
        | BranchInstruction::Jsr(target) => Some(*target),
        _ => None,
    }
}

/// Number of padding bytes after a switch opcode at `offset`
fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn branch_width(branch: &BranchInstruction<usize>, offset: usize, wide: bool) -> usize {
    match branch {
        BranchInstruction::If(_, _)
        | BranchInstruction::IfICmp(_, _)
        | BranchInstruction::IfACmp(_, _)
        | BranchInstruction::IfNull(_, _) => {
            if wide {
                8
            } else {
                3
            }
        }
        BranchInstruction::Goto(_) | BranchInstruction::Jsr(_) => {
            if wide {
                5
            } else {
                3
            }
        }
        BranchInstruction::Ret(idx) => {
            if *idx <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        BranchInstruction::TableSwitch { targets, .. } => {
            1 + switch_padding(offset) + 4 * (3 + targets.len())
        }
        BranchInstruction::LookupSwitch { targets, .. } => {
            1 + switch_padding(offset) + 8 * (1 + targets.len())
        }
        BranchInstruction::IReturn
        | BranchInstruction::LReturn
        | BranchInstruction::FReturn
        | BranchInstruction::DReturn
        | BranchInstruction::AReturn
        | BranchInstruction::Return
        | BranchInstruction::AThrow => 1,
    }
}

fn compute_offsets(instructions: &[LayoutInstruction], wide: &[bool]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0;
    for (instruction, wide) in instructions.iter().zip(wide) {
        offsets.push(offset);
        offset += match instruction {
            LayoutInstruction::Encoded(bytes) => bytes.len(),
            LayoutInstruction::Branch(branch) => branch_width(branch, offset, *wide),
        };
    }
    offsets.push(offset);
    offsets
}

fn ord_opcode(first: u8, comp: OrdComparison) -> u8 {
    first
        + match comp {
            OrdComparison::EQ => 0,
            OrdComparison::NE => 1,
            OrdComparison::LT => 2,
            OrdComparison::GE => 3,
            OrdComparison::GT => 4,
            OrdComparison::LE => 5,
        }
}

fn eq_opcode(first: u8, comp: EqComparison) -> u8 {
    match comp {
        EqComparison::EQ => first,
        EqComparison::NE => first + 1,
    }
}

/// Emit one branch at `offsets[idx]`
fn emit_branch(
    branch: &BranchInstruction<usize>,
    idx: usize,
    wide: bool,
    offsets: &[usize],
    code: &mut Vec<u8>,
) {
    let offset = offsets[idx];
    let relative = |target: &usize| offsets[*target] as isize - offset as isize;

    // `opcode target` or, when widened, `inverted_opcode +8; goto_w target`
    let mut conditional = |opcode: u8, inverted_opcode: u8, target: &usize| {
        if wide {
            code.push(inverted_opcode);
            code.extend_from_slice(&8i16.to_be_bytes());
            code.push(0xc8);
            code.extend_from_slice(&((relative(target) - 3) as i32).to_be_bytes());
        } else {
            code.push(opcode);
            code.extend_from_slice(&(relative(target) as i16).to_be_bytes());
        }
    };

    match branch {
        BranchInstruction::If(comp, target) => {
            return conditional(ord_opcode(0x99, *comp), ord_opcode(0x99, !*comp), target)
        }
        BranchInstruction::IfICmp(comp, target) => {
            return conditional(ord_opcode(0x9f, *comp), ord_opcode(0x9f, !*comp), target)
        }
        BranchInstruction::IfACmp(comp, target) => {
            return conditional(eq_opcode(0xa5, *comp), eq_opcode(0xa5, !*comp), target)
        }
        BranchInstruction::IfNull(comp, target) => {
            return conditional(eq_opcode(0xc6, *comp), eq_opcode(0xc6, !*comp), target)
        }
        _ => (),
    }

    let mut put = |bytes: &[u8]| code.extend_from_slice(bytes);
    match branch {
        BranchInstruction::Goto(target) => {
            if wide {
                put(&[0xc8]);
                put(&(relative(target) as i32).to_be_bytes());
            } else {
                put(&[0xa7]);
                put(&(relative(target) as i16).to_be_bytes());
            }
        }
        BranchInstruction::Jsr(target) => {
            if wide {
                put(&[0xc9]);
                put(&(relative(target) as i32).to_be_bytes());
            } else {
                put(&[0xa8]);
                put(&(relative(target) as i16).to_be_bytes());
            }
        }
        BranchInstruction::Ret(idx) => match u8::try_from(*idx) {
            Ok(idx) => put(&[0xa9, idx]),
            Err(_) => {
                put(&[0xc4, 0xa9]);
                put(&idx.to_be_bytes());
            }
        },
        BranchInstruction::TableSwitch {
            default,
            low,
            targets,
        } => {
            put(&[0xaa]);
            put(&[0u8; 3][..switch_padding(offset)]);
            put(&(relative(default) as i32).to_be_bytes());
            put(&low.to_be_bytes());
            put(&(low + targets.len() as i32 - 1).to_be_bytes());
            for target in targets {
                put(&(relative(target) as i32).to_be_bytes());
            }
        }
        BranchInstruction::LookupSwitch { default, targets } => {
            put(&[0xab]);
            put(&[0u8; 3][..switch_padding(offset)]);
            put(&(relative(default) as i32).to_be_bytes());
            put(&(targets.len() as i32).to_be_bytes());
            for (key, target) in targets {
                put(&key.to_be_bytes());
                put(&(relative(target) as i32).to_be_bytes());
            }
        }
        BranchInstruction::IReturn => put(&[0xac]),
        BranchInstruction::LReturn => put(&[0xad]),
        BranchInstruction::FReturn => put(&[0xae]),
        BranchInstruction::DReturn => put(&[0xaf]),
        BranchInstruction::AReturn => put(&[0xb0]),
        BranchInstruction::Return => put(&[0xb1]),
        BranchInstruction::AThrow => put(&[0xbf]),
        BranchInstruction::If(_, _)
        | BranchInstruction::IfICmp(_, _)
        | BranchInstruction::IfACmp(_, _)
        | BranchInstruction::IfNull(_, _) => (),
    }
}
