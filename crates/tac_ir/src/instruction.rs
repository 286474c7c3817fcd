//! Instruction representation (§3.4): a closed tagged union keyed by shape.
//!
//! Each shape in the spec's table becomes one `Instruction` variant. Where
//! several opcodes share a shape (the arithmetic family, `call`/`syscall`,
//! `branch`/`branch-not`) the variant carries an `Opcode` field so checking
//! and lowering can still dispatch on the precise opcode without the
//! combinatorial blow-up of one variant per opcode.

use crate::ids::{FieldId, LabelId, TypeId};
use crate::opcode::{CallingConvention, Opcode};
use crate::primitive::Primitive;
use tac_common::SourcePos;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `three` shape: arithmetic, comparison, pointer math, array-getp.
    Three {
        op: Opcode,
        dest: u32,
        lhs: u32,
        rhs: u32,
        pos: SourcePos,
    },
    /// `two` shape: move, cast, bnot, load, store, address.
    Two {
        op: Opcode,
        dest: u32,
        src: u32,
        pos: SourcePos,
    },
    /// `call` shape, shared by `call` and `syscall`.
    Call {
        op: Opcode,
        cc: CallingConvention,
        dest: Option<u32>,
        callee: u32,
        arg_count: u32,
        pos: SourcePos,
    },
    /// `arg` shape: a variadic-tail pseudo-instruction following a `call`
    /// or a struct/union field-list definition, three slots per record.
    Arg {
        args: [Option<u32>; 3],
        pos: SourcePos,
    },
    Jump {
        to: LabelId,
        pos: SourcePos,
    },
    /// `branch` shape, shared by `branch` and `branch-not`.
    Branch {
        op: Opcode,
        cond: u32,
        to: LabelId,
        pos: SourcePos,
    },
    Return {
        value: Option<u32>,
        pos: SourcePos,
    },
    Label {
        id: LabelId,
        pos: SourcePos,
    },
    /// `field` shape: `fgetp`.
    Field {
        r: u32,
        st: u32,
        field: FieldId,
        pos: SourcePos,
    },
    TypePrim {
        type_id: TypeId,
        prim: Primitive,
        pos: SourcePos,
    },
    TypePointer {
        type_id: TypeId,
        target: TypeId,
        pos: SourcePos,
    },
    TypeArray {
        type_id: TypeId,
        element: TypeId,
        count: u64,
        pos: SourcePos,
    },
    /// `type-struct`/`type-union`: `is_union` distinguishes the two since
    /// they share every other field (§3.3).
    TypeRecord {
        type_id: TypeId,
        is_union: bool,
        field_start: u32,
        field_count: u32,
        pos: SourcePos,
    },
    TypeBind {
        dest: u32,
        type_id: TypeId,
        pos: SourcePos,
    },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Three { op, .. } => *op,
            Instruction::Two { op, .. } => *op,
            Instruction::Call { op, .. } => *op,
            Instruction::Arg { .. } => Opcode::Arg,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::Branch { op, .. } => *op,
            Instruction::Return { .. } => Opcode::Return,
            Instruction::Label { .. } => Opcode::Label,
            Instruction::Field { .. } => Opcode::FGetP,
            Instruction::TypePrim { .. } => Opcode::TypePrim,
            Instruction::TypePointer { .. } => Opcode::TypePointer,
            Instruction::TypeArray { .. } => Opcode::TypeArray,
            Instruction::TypeRecord { is_union, .. } => {
                if *is_union {
                    Opcode::TypeUnion
                } else {
                    Opcode::TypeStruct
                }
            }
            Instruction::TypeBind { .. } => Opcode::TypeBind,
        }
    }

    pub fn pos(&self) -> SourcePos {
        match self {
            Instruction::Three { pos, .. }
            | Instruction::Two { pos, .. }
            | Instruction::Call { pos, .. }
            | Instruction::Arg { pos, .. }
            | Instruction::Jump { pos, .. }
            | Instruction::Branch { pos, .. }
            | Instruction::Return { pos, .. }
            | Instruction::Label { pos, .. }
            | Instruction::Field { pos, .. }
            | Instruction::TypePrim { pos, .. }
            | Instruction::TypePointer { pos, .. }
            | Instruction::TypeArray { pos, .. }
            | Instruction::TypeRecord { pos, .. }
            | Instruction::TypeBind { pos, .. } => *pos,
        }
    }

    /// True for instructions that are part of a real function's executable
    /// body, as opposed to type-forming ops (which may appear in a
    /// type-only module, §4.1 validation).
    pub fn is_executable(&self) -> bool {
        !matches!(
            self,
            Instruction::TypePrim { .. }
                | Instruction::TypePointer { .. }
                | Instruction::TypeArray { .. }
                | Instruction::TypeRecord { .. }
        )
    }

    /// True if this instruction, as the last one of a real function, ends
    /// its body correctly (§4.1 validation).
    pub fn terminates_function(&self) -> bool {
        matches!(self, Instruction::Jump { .. } | Instruction::Return { .. })
    }
}
