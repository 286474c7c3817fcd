//! IR model and linkage context for the Tacit compiler back end.
//!
//! This crate owns the data model described in spec §3: identifier spaces,
//! the primitive/opcode tables, the instruction representation, and the
//! `Linkage`/`FunctionIr` lifecycle. It knows nothing about surface syntax
//! (that's `tac_parser`), type checking (`tac_typeck`), or lowering
//! (`tac_scalarize`, `tac_codegen_c`, `tac_codegen_x64`).

pub mod constant;
pub mod function;
pub mod ids;
pub mod instruction;
pub mod linkage;
pub mod opcode;
pub mod primitive;
pub mod types;

pub use constant::{ConstValue, Constant, ConstantPool};
pub use function::{FunctionIr, LabelBinding, LabelTable};
pub use ids::{FieldId, LabelId, Operand, TypeId, CONSTANT_PREFIX, MAX_OPERAND};
pub use instruction::Instruction;
pub use linkage::Linkage;
pub use opcode::{CallingConvention, Opcode};
pub use primitive::Primitive;
pub use types::{FieldSlot, TypeInfo, TypePayload};
