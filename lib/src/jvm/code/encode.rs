//! Encoding of non-branching instructions
//!
//! Regular instructions have the same encoding wherever they land in the code array, so they get
//! encoded once up front. Branches are encoded during layout (see `jump_encoding`).

use super::{CompareMode, Instruction, InvokeType, ShiftType};
use crate::jvm::class_file::{ConstantIndex, ConstantsPool, Serialize};
use crate::jvm::{BaseType, Error};
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::convert::TryFrom;

/// Opcode of the `wide` prefix
const WIDE: u8 = 0xc4;

/// Encode an instruction, adding the constants it needs to the pool
pub fn encode_instruction<W: WriteBytesExt>(
    instruction: &Instruction,
    constants: &mut ConstantsPool,
    writer: &mut W,
) -> Result<(), Error> {
    /* The load/store instructions follow the same pattern:
     *
     *   - short form (0-3) have special bytes
     *   - normal form (0-255) use `iload` plus a byte operand
     *   - wide form (255-65535) use `wide iload` plus two byte operands
     */
    fn load_or_store<W: WriteBytesExt>(
        idx: u16,
        short_form_start: u8,
        normal_form: u8,
        writer: &mut W,
    ) -> std::io::Result<()> {
        match u8::try_from(idx) {
            Ok(n @ 0..=3) => (short_form_start + n).serialize(writer),
            Ok(n) => {
                normal_form.serialize(writer)?;
                n.serialize(writer)
            }
            Err(_) => {
                WIDE.serialize(writer)?;
                normal_form.serialize(writer)?;
                idx.serialize(writer)
            }
        }
    }

    fn with_index<W: WriteBytesExt>(
        opcode: u8,
        index: ConstantIndex,
        writer: &mut W,
    ) -> std::io::Result<()> {
        opcode.serialize(writer)?;
        index.serialize(writer)
    }

    use Instruction::*;
    match instruction {
        Nop => 0x00u8.serialize(writer)?,
        AConstNull => 0x01u8.serialize(writer)?,
        IConstM1 => 0x02u8.serialize(writer)?,
        IConst0 => 0x03u8.serialize(writer)?,
        IConst1 => 0x04u8.serialize(writer)?,
        IConst2 => 0x05u8.serialize(writer)?,
        IConst3 => 0x06u8.serialize(writer)?,
        IConst4 => 0x07u8.serialize(writer)?,
        IConst5 => 0x08u8.serialize(writer)?,
        LConst0 => 0x09u8.serialize(writer)?,
        LConst1 => 0x0au8.serialize(writer)?,
        FConst0 => 0x0bu8.serialize(writer)?,
        FConst1 => 0x0cu8.serialize(writer)?,
        FConst2 => 0x0du8.serialize(writer)?,
        DConst0 => 0x0eu8.serialize(writer)?,
        DConst1 => 0x0fu8.serialize(writer)?,
        BiPush(b) => {
            0x10u8.serialize(writer)?;
            b.serialize(writer)?;
        }
        SiPush(s) => {
            0x11u8.serialize(writer)?;
            s.serialize(writer)?;
        }
        Ldc(constant) => {
            let index = constants.get_loadable(constant)?;
            if constant.width() == 2 {
                with_index(0x14, index, writer)?;
            } else {
                match u8::try_from(index.0) {
                    Ok(b) => {
                        0x12u8.serialize(writer)?;
                        b.serialize(writer)?;
                    }
                    Err(_) => with_index(0x13, index, writer)?,
                }
            }
        }
        ILoad(idx) => load_or_store(*idx, 0x1a, 0x15, writer)?,
        LLoad(idx) => load_or_store(*idx, 0x1e, 0x16, writer)?,
        FLoad(idx) => load_or_store(*idx, 0x22, 0x17, writer)?,
        DLoad(idx) => load_or_store(*idx, 0x26, 0x18, writer)?,
        ALoad(idx) => load_or_store(*idx, 0x2a, 0x19, writer)?,
        IALoad => 0x2eu8.serialize(writer)?,
        LALoad => 0x2fu8.serialize(writer)?,
        FALoad => 0x30u8.serialize(writer)?,
        DALoad => 0x31u8.serialize(writer)?,
        AALoad => 0x32u8.serialize(writer)?,
        BALoad => 0x33u8.serialize(writer)?,
        CALoad => 0x34u8.serialize(writer)?,
        SALoad => 0x35u8.serialize(writer)?,
        IStore(idx) => load_or_store(*idx, 0x3b, 0x36, writer)?,
        LStore(idx) => load_or_store(*idx, 0x3f, 0x37, writer)?,
        FStore(idx) => load_or_store(*idx, 0x43, 0x38, writer)?,
        DStore(idx) => load_or_store(*idx, 0x47, 0x39, writer)?,
        AStore(idx) => load_or_store(*idx, 0x4b, 0x3a, writer)?,
        IAStore => 0x4fu8.serialize(writer)?,
        LAStore => 0x50u8.serialize(writer)?,
        FAStore => 0x51u8.serialize(writer)?,
        DAStore => 0x52u8.serialize(writer)?,
        AAStore => 0x53u8.serialize(writer)?,
        BAStore => 0x54u8.serialize(writer)?,
        CAStore => 0x55u8.serialize(writer)?,
        SAStore => 0x56u8.serialize(writer)?,
        Pop => 0x57u8.serialize(writer)?,
        Pop2 => 0x58u8.serialize(writer)?,
        Dup => 0x59u8.serialize(writer)?,
        DupX1 => 0x5au8.serialize(writer)?,
        DupX2 => 0x5bu8.serialize(writer)?,
        Dup2 => 0x5cu8.serialize(writer)?,
        Dup2X1 => 0x5du8.serialize(writer)?,
        Dup2X2 => 0x5eu8.serialize(writer)?,
        Swap => 0x5fu8.serialize(writer)?,
        IAdd => 0x60u8.serialize(writer)?,
        LAdd => 0x61u8.serialize(writer)?,
        FAdd => 0x62u8.serialize(writer)?,
        DAdd => 0x63u8.serialize(writer)?,
        ISub => 0x64u8.serialize(writer)?,
        LSub => 0x65u8.serialize(writer)?,
        FSub => 0x66u8.serialize(writer)?,
        DSub => 0x67u8.serialize(writer)?,
        IMul => 0x68u8.serialize(writer)?,
        LMul => 0x69u8.serialize(writer)?,
        FMul => 0x6au8.serialize(writer)?,
        DMul => 0x6bu8.serialize(writer)?,
        IDiv => 0x6cu8.serialize(writer)?,
        LDiv => 0x6du8.serialize(writer)?,
        FDiv => 0x6eu8.serialize(writer)?,
        DDiv => 0x6fu8.serialize(writer)?,
        IRem => 0x70u8.serialize(writer)?,
        LRem => 0x71u8.serialize(writer)?,
        FRem => 0x72u8.serialize(writer)?,
        DRem => 0x73u8.serialize(writer)?,
        INeg => 0x74u8.serialize(writer)?,
        LNeg => 0x75u8.serialize(writer)?,
        FNeg => 0x76u8.serialize(writer)?,
        DNeg => 0x77u8.serialize(writer)?,
        ISh(ShiftType::Left) => 0x78u8.serialize(writer)?,
        LSh(ShiftType::Left) => 0x79u8.serialize(writer)?,
        ISh(ShiftType::ArithmeticRight) => 0x7au8.serialize(writer)?,
        LSh(ShiftType::ArithmeticRight) => 0x7bu8.serialize(writer)?,
        ISh(ShiftType::LogicalRight) => 0x7cu8.serialize(writer)?,
        LSh(ShiftType::LogicalRight) => 0x7du8.serialize(writer)?,
        IAnd => 0x7eu8.serialize(writer)?,
        LAnd => 0x7fu8.serialize(writer)?,
        IOr => 0x80u8.serialize(writer)?,
        LOr => 0x81u8.serialize(writer)?,
        IXor => 0x82u8.serialize(writer)?,
        LXor => 0x83u8.serialize(writer)?,
        IInc(idx, diff) => match (u8::try_from(*idx), i8::try_from(*diff)) {
            (Ok(idx), Ok(diff)) => {
                0x84u8.serialize(writer)?;
                idx.serialize(writer)?;
                diff.serialize(writer)?;
            }
            _ => {
                WIDE.serialize(writer)?;
                0x84u8.serialize(writer)?;
                idx.serialize(writer)?;
                diff.serialize(writer)?;
            }
        },
        I2L => 0x85u8.serialize(writer)?,
        I2F => 0x86u8.serialize(writer)?,
        I2D => 0x87u8.serialize(writer)?,
        L2I => 0x88u8.serialize(writer)?,
        L2F => 0x89u8.serialize(writer)?,
        L2D => 0x8au8.serialize(writer)?,
        F2I => 0x8bu8.serialize(writer)?,
        F2L => 0x8cu8.serialize(writer)?,
        F2D => 0x8du8.serialize(writer)?,
        D2I => 0x8eu8.serialize(writer)?,
        D2L => 0x8fu8.serialize(writer)?,
        D2F => 0x90u8.serialize(writer)?,
        I2B => 0x91u8.serialize(writer)?,
        I2C => 0x92u8.serialize(writer)?,
        I2S => 0x93u8.serialize(writer)?,
        LCmp => 0x94u8.serialize(writer)?,
        FCmp(CompareMode::L) => 0x95u8.serialize(writer)?,
        FCmp(CompareMode::G) => 0x96u8.serialize(writer)?,
        DCmp(CompareMode::L) => 0x97u8.serialize(writer)?,
        DCmp(CompareMode::G) => 0x98u8.serialize(writer)?,
        GetStatic(field) => with_index(0xb2, constants.get_field_ref(field)?, writer)?,
        PutStatic(field) => with_index(0xb3, constants.get_field_ref(field)?, writer)?,
        GetField(field) => with_index(0xb4, constants.get_field_ref(field)?, writer)?,
        PutField(field) => with_index(0xb5, constants.get_field_ref(field)?, writer)?,
        Invoke(InvokeType::Virtual, method) => {
            with_index(0xb6, constants.get_method_ref(method)?, writer)?
        }
        Invoke(InvokeType::Special, method) => {
            with_index(0xb7, constants.get_method_ref(method)?, writer)?
        }
        Invoke(InvokeType::Static, method) => {
            with_index(0xb8, constants.get_method_ref(method)?, writer)?
        }
        Invoke(InvokeType::Interface, method) => {
            with_index(0xb9, constants.get_method_ref(method)?, writer)?;
            let count = method.descriptor.parameter_length(true) as u8;
            count.serialize(writer)?;
            0u8.serialize(writer)?;
        }
        InvokeDynamic(invoke_dynamic) => {
            with_index(0xba, constants.get_invoke_dynamic(invoke_dynamic)?, writer)?;
            0u16.serialize(writer)?;
        }
        New(ref_type) => with_index(0xbb, constants.get_ref_type(ref_type)?, writer)?,
        NewArray(base_type) => {
            0xbcu8.serialize(writer)?;
            let atype: u8 = match base_type {
                BaseType::Boolean => 4,
                BaseType::Char => 5,
                BaseType::Float => 6,
                BaseType::Double => 7,
                BaseType::Byte => 8,
                BaseType::Short => 9,
                BaseType::Int => 10,
                BaseType::Long => 11,
            };
            atype.serialize(writer)?;
        }
        ANewArray(ref_type) => with_index(0xbd, constants.get_ref_type(ref_type)?, writer)?,
        ArrayLength => 0xbeu8.serialize(writer)?,
        CheckCast(ref_type) => with_index(0xc0, constants.get_ref_type(ref_type)?, writer)?,
        InstanceOf(ref_type) => with_index(0xc1, constants.get_ref_type(ref_type)?, writer)?,
        MonitorEnter => 0xc2u8.serialize(writer)?,
        MonitorExit => 0xc3u8.serialize(writer)?,
        MultiANewArray(ref_type, dimensions) => {
            with_index(0xc5, constants.get_ref_type(ref_type)?, writer)?;
            dimensions.serialize(writer)?;
        }
    };
    Ok(())
}
