//! Decoding of the bytes inside a `Code` attribute
//!
//! Jump targets come out as absolute offsets into the code array. Every target is checked to land
//! on the start of an instruction, so the class reader can hand out one label per target offset.

use super::{
    AnyInstruction, BranchInstruction, CompareMode, ConstantData, EqComparison, Instruction,
    InvokeType, OrdComparison, ShiftType,
};
use crate::jvm::class_file::{ByteReader, ConstantsPool};
use crate::jvm::{BaseType, MalformedKind};
use crate::util::Width;
use std::collections::HashSet;

/// Decoded instruction, along with its offset in the code array
pub type DecodedInstruction = (usize, AnyInstruction<usize>);

/// Decode a full code array
pub fn decode_instructions(
    code: &[u8],
    constants: &ConstantsPool,
) -> Result<Vec<DecodedInstruction>, MalformedKind> {
    let mut reader = ByteReader::new(code);
    let mut instructions = vec![];
    while !reader.is_exhausted() {
        let offset = reader.position();
        let instruction = decode_instruction(&mut reader, offset, code.len(), constants)?;
        instructions.push((offset, instruction));
    }

    let boundaries: HashSet<usize> = instructions.iter().map(|(offset, _)| *offset).collect();
    for (offset, instruction) in &instructions {
        if let AnyInstruction::Branch(branch) = instruction {
            for target in branch.jump_targets() {
                if !boundaries.contains(target) {
                    return Err(MalformedKind::InvalidBranchTarget {
                        offset: *offset,
                        target: *target as isize,
                    });
                }
            }
        }
    }

    Ok(instructions)
}

fn decode_instruction(
    reader: &mut ByteReader<'_>,
    offset: usize,
    code_length: usize,
    constants: &ConstantsPool,
) -> Result<AnyInstruction<usize>, MalformedKind> {
    use BranchInstruction as B;
    use Instruction::*;

    // Resolve a relative jump into an absolute offset
    let target = |delta: isize| -> Result<usize, MalformedKind> {
        let target = offset as isize + delta;
        if 0 <= target && (target as usize) < code_length {
            Ok(target as usize)
        } else {
            Err(MalformedKind::InvalidBranchTarget { offset, target })
        }
    };
    let short_target = |reader: &mut ByteReader<'_>| -> Result<usize, MalformedKind> {
        target(reader.read_i16()? as isize)
    };

    let opcode = reader.read_u8()?;
    let instruction = match opcode {
        0x00 => Nop,
        0x01 => AConstNull,
        0x02 => IConstM1,
        0x03 => IConst0,
        0x04 => IConst1,
        0x05 => IConst2,
        0x06 => IConst3,
        0x07 => IConst4,
        0x08 => IConst5,
        0x09 => LConst0,
        0x0a => LConst1,
        0x0b => FConst0,
        0x0c => FConst1,
        0x0d => FConst2,
        0x0e => DConst0,
        0x0f => DConst1,
        0x10 => BiPush(reader.read_i8()?),
        0x11 => SiPush(reader.read_i16()?),
        0x12 => Ldc(loadable(constants, reader.read_u8()? as u16, false)?),
        0x13 => Ldc(loadable(constants, reader.read_u16()?, false)?),
        0x14 => Ldc(loadable(constants, reader.read_u16()?, true)?),
        0x15 => ILoad(reader.read_u8()? as u16),
        0x16 => LLoad(reader.read_u8()? as u16),
        0x17 => FLoad(reader.read_u8()? as u16),
        0x18 => DLoad(reader.read_u8()? as u16),
        0x19 => ALoad(reader.read_u8()? as u16),
        0x1a..=0x1d => ILoad((opcode - 0x1a) as u16),
        0x1e..=0x21 => LLoad((opcode - 0x1e) as u16),
        0x22..=0x25 => FLoad((opcode - 0x22) as u16),
        0x26..=0x29 => DLoad((opcode - 0x26) as u16),
        0x2a..=0x2d => ALoad((opcode - 0x2a) as u16),
        0x2e => IALoad,
        0x2f => LALoad,
        0x30 => FALoad,
        0x31 => DALoad,
        0x32 => AALoad,
        0x33 => BALoad,
        0x34 => CALoad,
        0x35 => SALoad,
        0x36 => IStore(reader.read_u8()? as u16),
        0x37 => LStore(reader.read_u8()? as u16),
        0x38 => FStore(reader.read_u8()? as u16),
        0x39 => DStore(reader.read_u8()? as u16),
        0x3a => AStore(reader.read_u8()? as u16),
        0x3b..=0x3e => IStore((opcode - 0x3b) as u16),
        0x3f..=0x42 => LStore((opcode - 0x3f) as u16),
        0x43..=0x46 => FStore((opcode - 0x43) as u16),
        0x47..=0x4a => DStore((opcode - 0x47) as u16),
        0x4b..=0x4e => AStore((opcode - 0x4b) as u16),
        0x4f => IAStore,
        0x50 => LAStore,
        0x51 => FAStore,
        0x52 => DAStore,
        0x53 => AAStore,
        0x54 => BAStore,
        0x55 => CAStore,
        0x56 => SAStore,
        0x57 => Pop,
        0x58 => Pop2,
        0x59 => Dup,
        0x5a => DupX1,
        0x5b => DupX2,
        0x5c => Dup2,
        0x5d => Dup2X1,
        0x5e => Dup2X2,
        0x5f => Swap,
        0x60 => IAdd,
        0x61 => LAdd,
        0x62 => FAdd,
        0x63 => DAdd,
        0x64 => ISub,
        0x65 => LSub,
        0x66 => FSub,
        0x67 => DSub,
        0x68 => IMul,
        0x69 => LMul,
        0x6a => FMul,
        0x6b => DMul,
        0x6c => IDiv,
        0x6d => LDiv,
        0x6e => FDiv,
        0x6f => DDiv,
        0x70 => IRem,
        0x71 => LRem,
        0x72 => FRem,
        0x73 => DRem,
        0x74 => INeg,
        0x75 => LNeg,
        0x76 => FNeg,
        0x77 => DNeg,
        0x78 => ISh(ShiftType::Left),
        0x79 => LSh(ShiftType::Left),
        0x7a => ISh(ShiftType::ArithmeticRight),
        0x7b => LSh(ShiftType::ArithmeticRight),
        0x7c => ISh(ShiftType::LogicalRight),
        0x7d => LSh(ShiftType::LogicalRight),
        0x7e => IAnd,
        0x7f => LAnd,
        0x80 => IOr,
        0x81 => LOr,
        0x82 => IXor,
        0x83 => LXor,
        0x84 => IInc(reader.read_u8()? as u16, reader.read_i8()? as i16),
        0x85 => I2L,
        0x86 => I2F,
        0x87 => I2D,
        0x88 => L2I,
        0x89 => L2F,
        0x8a => L2D,
        0x8b => F2I,
        0x8c => F2L,
        0x8d => F2D,
        0x8e => D2I,
        0x8f => D2L,
        0x90 => D2F,
        0x91 => I2B,
        0x92 => I2C,
        0x93 => I2S,
        0x94 => LCmp,
        0x95 => FCmp(CompareMode::L),
        0x96 => FCmp(CompareMode::G),
        0x97 => DCmp(CompareMode::L),
        0x98 => DCmp(CompareMode::G),

        0x99 => return Ok(branch(B::If(OrdComparison::EQ, short_target(reader)?))),
        0x9a => return Ok(branch(B::If(OrdComparison::NE, short_target(reader)?))),
        0x9b => return Ok(branch(B::If(OrdComparison::LT, short_target(reader)?))),
        0x9c => return Ok(branch(B::If(OrdComparison::GE, short_target(reader)?))),
        0x9d => return Ok(branch(B::If(OrdComparison::GT, short_target(reader)?))),
        0x9e => return Ok(branch(B::If(OrdComparison::LE, short_target(reader)?))),
        0x9f => return Ok(branch(B::IfICmp(OrdComparison::EQ, short_target(reader)?))),
        0xa0 => return Ok(branch(B::IfICmp(OrdComparison::NE, short_target(reader)?))),
        0xa1 => return Ok(branch(B::IfICmp(OrdComparison::LT, short_target(reader)?))),
        0xa2 => return Ok(branch(B::IfICmp(OrdComparison::GE, short_target(reader)?))),
        0xa3 => return Ok(branch(B::IfICmp(OrdComparison::GT, short_target(reader)?))),
        0xa4 => return Ok(branch(B::IfICmp(OrdComparison::LE, short_target(reader)?))),
        0xa5 => return Ok(branch(B::IfACmp(EqComparison::EQ, short_target(reader)?))),
        0xa6 => return Ok(branch(B::IfACmp(EqComparison::NE, short_target(reader)?))),
        0xa7 => return Ok(branch(B::Goto(short_target(reader)?))),
        0xa8 => return Ok(branch(B::Jsr(short_target(reader)?))),
        0xa9 => return Ok(branch(B::Ret(reader.read_u8()? as u16))),
        0xaa => {
            reader.align_to_4()?;
            let default = target(reader.read_i32()? as isize)?;
            let low = reader.read_i32()?;
            let high = reader.read_i32()?;
            if high < low {
                return Err(MalformedKind::InvalidOpcode { offset, opcode });
            }
            let targets = (low..=high)
                .map(|_| target(reader.read_i32()? as isize))
                .collect::<Result<_, _>>()?;
            return Ok(branch(B::TableSwitch {
                default,
                low,
                targets,
            }));
        }
        0xab => {
            reader.align_to_4()?;
            let default = target(reader.read_i32()? as isize)?;
            let npairs = reader.read_i32()?;
            if npairs < 0 {
                return Err(MalformedKind::InvalidOpcode { offset, opcode });
            }
            let targets = (0..npairs)
                .map(|_| {
                    let key = reader.read_i32()?;
                    Ok((key, target(reader.read_i32()? as isize)?))
                })
                .collect::<Result<_, MalformedKind>>()?;
            return Ok(branch(B::LookupSwitch { default, targets }));
        }
        0xac => return Ok(branch(B::IReturn)),
        0xad => return Ok(branch(B::LReturn)),
        0xae => return Ok(branch(B::FReturn)),
        0xaf => return Ok(branch(B::DReturn)),
        0xb0 => return Ok(branch(B::AReturn)),
        0xb1 => return Ok(branch(B::Return)),

        0xb2 => GetStatic(constants.field_ref(reader.read_u16()?)?),
        0xb3 => PutStatic(constants.field_ref(reader.read_u16()?)?),
        0xb4 => GetField(constants.field_ref(reader.read_u16()?)?),
        0xb5 => PutField(constants.field_ref(reader.read_u16()?)?),
        0xb6 => Invoke(
            InvokeType::Virtual,
            constants.method_ref(reader.read_u16()?)?,
        ),
        0xb7 => Invoke(
            InvokeType::Special,
            constants.method_ref(reader.read_u16()?)?,
        ),
        0xb8 => Invoke(
            InvokeType::Static,
            constants.method_ref(reader.read_u16()?)?,
        ),
        0xb9 => {
            let method = constants.method_ref(reader.read_u16()?)?;
            let _count = reader.read_u8()?;
            let _zero = reader.read_u8()?;
            Invoke(InvokeType::Interface, method)
        }
        0xba => {
            let invoke_dynamic = constants.invoke_dynamic(reader.read_u16()?)?;
            let _zeros = reader.read_u16()?;
            InvokeDynamic(invoke_dynamic)
        }
        0xbb => New(constants.ref_type(reader.read_u16()?)?),
        0xbc => {
            let base_type = match reader.read_u8()? {
                4 => BaseType::Boolean,
                5 => BaseType::Char,
                6 => BaseType::Float,
                7 => BaseType::Double,
                8 => BaseType::Byte,
                9 => BaseType::Short,
                10 => BaseType::Int,
                11 => BaseType::Long,
                _ => return Err(MalformedKind::InvalidOpcode { offset, opcode }),
            };
            NewArray(base_type)
        }
        0xbd => ANewArray(constants.ref_type(reader.read_u16()?)?),
        0xbe => ArrayLength,
        0xbf => return Ok(branch(B::AThrow)),
        0xc0 => CheckCast(constants.ref_type(reader.read_u16()?)?),
        0xc1 => InstanceOf(constants.ref_type(reader.read_u16()?)?),
        0xc2 => MonitorEnter,
        0xc3 => MonitorExit,
        0xc4 => {
            let wide_opcode = reader.read_u8()?;
            let index = reader.read_u16()?;
            match wide_opcode {
                0x15 => ILoad(index),
                0x16 => LLoad(index),
                0x17 => FLoad(index),
                0x18 => DLoad(index),
                0x19 => ALoad(index),
                0x36 => IStore(index),
                0x37 => LStore(index),
                0x38 => FStore(index),
                0x39 => DStore(index),
                0x3a => AStore(index),
                0x84 => IInc(index, reader.read_i16()?),
                0xa9 => return Ok(branch(B::Ret(index))),
                _ => {
                    return Err(MalformedKind::InvalidWideOpcode {
                        offset,
                        opcode: wide_opcode,
                    })
                }
            }
        }
        0xc5 => MultiANewArray(constants.ref_type(reader.read_u16()?)?, reader.read_u8()?),
        0xc6 => return Ok(branch(B::IfNull(EqComparison::EQ, short_target(reader)?))),
        0xc7 => return Ok(branch(B::IfNull(EqComparison::NE, short_target(reader)?))),
        0xc8 => return Ok(branch(B::Goto(target(reader.read_i32()? as isize)?))),
        0xc9 => return Ok(branch(B::Jsr(target(reader.read_i32()? as isize)?))),
        _ => return Err(MalformedKind::InvalidOpcode { offset, opcode }),
    };
    Ok(AnyInstruction::Regular(instruction))
}

fn branch(instruction: BranchInstruction<usize>) -> AnyInstruction<usize> {
    AnyInstruction::Branch(instruction)
}

/// Resolve an `ldc*` operand, checking that its width matches the opcode
fn loadable(
    constants: &ConstantsPool,
    index: u16,
    wide: bool,
) -> Result<ConstantData, MalformedKind> {
    let constant = constants.loadable(index)?;
    if (constant.width() == 2) != wide {
        let expected = if wide {
            "Long or Double"
        } else {
            "single-slot loadable constant"
        };
        return Err(MalformedKind::WrongConstantKind { index, expected });
    }
    Ok(constant)
}
