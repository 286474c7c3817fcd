//! The per-opcode type checker (§4.2 second half) and constant validity
//! rules. Must run after [`crate::infer::infer`] on the same function.

use tac_common::{RegisterRef, TacError, TacResult};
use tac_ir::{ConstValue, FunctionIr, Instruction, Linkage, Opcode, Operand, Primitive, TypeId, TypePayload};

/// Walk every instruction of `func` and enforce its opcode's typing
/// contract. Also finalizes `func.return_type`/`has_return_type` from the
/// function's `return` instructions, checking every return agrees.
pub fn check(func: &mut FunctionIr, linkage: &Linkage) -> TacResult<()> {
    let mut return_established = false;

    for index in 0..func.instructions.len() {
        let instr = func.instructions[index].clone();
        match instr {
            Instruction::Two { op, dest, src, .. } => check_two(func, linkage, op, dest, src)?,
            Instruction::Three { op, dest, lhs, rhs, .. } => check_three(func, linkage, op, dest, lhs, rhs)?,
            Instruction::Field { r, st, field, .. } => check_fgetp(func, linkage, r, st, field)?,
            Instruction::Call { op, callee, .. } => check_call(func, linkage, op, callee)?,
            Instruction::Branch { cond, .. } => check_branch(func, linkage, cond)?,
            Instruction::Return { value, .. } => {
                check_return(func, linkage, value, &mut return_established)?
            }
            _ => {}
        }
    }
    Ok(())
}

fn reg_ref(func: &FunctionIr, id: u32) -> RegisterRef {
    match func.register_name(id) {
        Some(name) => RegisterRef::Named(name.to_string()),
        None => RegisterRef::Anonymous(id),
    }
}

/// Resolve a "read" operand's type, validating it against its declared
/// type if it decodes to a constant (§4.2 constant validity).
fn read_type(func: &FunctionIr, linkage: &Linkage, word: u32, opcode: Opcode) -> TacResult<TypeId> {
    match Operand::decode(word) {
        Operand::Register(id) => Ok(func.types[id as usize]),
        Operand::Constant(idx) => {
            let constant = func.constants.get(idx).expect("interned constant must exist");
            check_constant_value(linkage, constant.type_id, &constant.value, opcode)?;
            Ok(constant.type_id)
        }
    }
}

fn prim(linkage: &Linkage, type_id: TypeId) -> Primitive {
    linkage.type_info(type_id).prim
}

fn mismatch(opcode: Opcode, message: &str, register: Option<RegisterRef>, expected: TypeId, found: TypeId, linkage: &Linkage) -> TacError {
    TacError::type_mismatch(
        opcode,
        message,
        register,
        Some(&linkage.describe_type(expected)),
        Some(&linkage.describe_type(found)),
    )
}

/// One optional pointer deref, then any number of array layers (§4.2
/// "Array element descent").
fn descend_to_scalar(linkage: &Linkage, type_id: TypeId) -> TypeId {
    let mut id = type_id;
    if prim(linkage, id) == Primitive::Pointer {
        if let TypePayload::Pointer { target_type_id } = linkage.type_info(id).payload {
            id = target_type_id;
        }
    }
    loop {
        if prim(linkage, id) != Primitive::Array {
            break;
        }
        match linkage.type_info(id).payload {
            TypePayload::Array { element_type_id, .. } => id = element_type_id,
            _ => break,
        }
    }
    id
}

fn check_two(func: &FunctionIr, linkage: &Linkage, op: Opcode, dest: u32, src: u32) -> TacResult<()> {
    let dest_type = func.types[dest as usize];
    let src_type = read_type(func, linkage, src, op)?;
    match op {
        Opcode::Move => {
            if dest_type != src_type {
                return Err(mismatch(op, "move requires identical types", Some(reg_ref(func, dest)), dest_type, src_type, linkage));
            }
        }
        Opcode::Cast => {
            let (d, s) = (prim(linkage, dest_type), prim(linkage, src_type));
            let ok = (d.is_integer() && s.is_integer())
                || (d.is_float() && s.is_float())
                || (d == Primitive::Pointer && s == Primitive::Pointer);
            if !ok {
                return Err(mismatch(
                    op,
                    "cast requires numerics of the same kind or two pointers",
                    Some(reg_ref(func, dest)),
                    dest_type,
                    src_type,
                    linkage,
                ));
            }
        }
        Opcode::BNot => {
            if dest_type != src_type || !prim(linkage, dest_type).is_integer() {
                return Err(mismatch(op, "bnot requires identical integer types", Some(reg_ref(func, dest)), dest_type, src_type, linkage));
            }
        }
        Opcode::Load => {
            let target = match linkage.type_info(src_type).payload {
                TypePayload::Pointer { target_type_id } if prim(linkage, src_type) == Primitive::Pointer => target_type_id,
                _ => {
                    return Err(mismatch(op, "load requires a pointer source", Some(reg_ref(func, dest)), dest_type, src_type, linkage))
                }
            };
            if target != dest_type {
                return Err(mismatch(op, "load target type does not match dest", Some(reg_ref(func, dest)), dest_type, target, linkage));
            }
        }
        Opcode::Store => {
            let target = match linkage.type_info(dest_type).payload {
                TypePayload::Pointer { target_type_id } if prim(linkage, dest_type) == Primitive::Pointer => target_type_id,
                _ => {
                    return Err(mismatch(op, "store requires a pointer dest", Some(reg_ref(func, dest)), dest_type, src_type, linkage))
                }
            };
            if target != src_type {
                return Err(mismatch(op, "store source type does not match pointer target", Some(reg_ref(func, dest)), target, src_type, linkage));
            }
        }
        Opcode::Address => {
            if prim(linkage, dest_type) != Primitive::Pointer {
                return Err(mismatch(op, "address requires a pointer dest", Some(reg_ref(func, dest)), dest_type, src_type, linkage));
            }
            if let TypePayload::Pointer { target_type_id } = linkage.type_info(dest_type).payload {
                if target_type_id != src_type {
                    return Err(mismatch(op, "address dest must point to src's type", Some(reg_ref(func, dest)), target_type_id, src_type, linkage));
                }
            }
        }
        _ => unreachable!("non-`two`-shaped opcode reached check_two"),
    }
    Ok(())
}

fn check_three(func: &FunctionIr, linkage: &Linkage, op: Opcode, dest: u32, lhs: u32, rhs: u32) -> TacResult<()> {
    let dest_type = func.types[dest as usize];
    let lhs_type = read_type(func, linkage, lhs, op)?;
    let rhs_type = read_type(func, linkage, rhs, op)?;

    match op {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Band | Opcode::Bor | Opcode::Bxor
        | Opcode::Shl | Opcode::Shr => {
            if dest_type != lhs_type || lhs_type != rhs_type {
                return Err(mismatch(op, "lhs, rhs, and dest must share a type", Some(reg_ref(func, dest)), dest_type, lhs_type, linkage));
            }
            let element = descend_to_scalar(linkage, dest_type);
            let element_prim = prim(linkage, element);
            let ok = if op.is_integer_only() {
                element_prim.is_integer()
            } else {
                element_prim.is_numeric()
            };
            if !ok {
                return Err(mismatch(op, "operand element type must be numeric", Some(reg_ref(func, dest)), element, element, linkage));
            }
        }
        Opcode::PointerAdd | Opcode::PointerSubtract => {
            if dest_type != lhs_type {
                return Err(mismatch(op, "pointer arithmetic requires dest == lhs", Some(reg_ref(func, dest)), dest_type, lhs_type, linkage));
            }
            if prim(linkage, dest_type) != Primitive::Pointer {
                return Err(mismatch(op, "pointer arithmetic dest must be a pointer", Some(reg_ref(func, dest)), dest_type, dest_type, linkage));
            }
            if !prim(linkage, rhs_type).is_integer() {
                return Err(mismatch(op, "expected integer", Some(reg_ref(func, dest)), rhs_type, rhs_type, linkage));
            }
        }
        Opcode::Gt | Opcode::Lt | Opcode::Eq | Opcode::Neq | Opcode::Gte | Opcode::Lte => {
            if lhs_type != rhs_type {
                return Err(mismatch(op, "comparison operands must share a type", None, lhs_type, rhs_type, linkage));
            }
            if prim(linkage, dest_type) != Primitive::Boolean {
                return Err(mismatch(op, "comparison dest must be boolean", Some(reg_ref(func, dest)), dest_type, dest_type, linkage));
            }
            let element = descend_to_scalar(linkage, lhs_type);
            let element_prim = prim(linkage, element);
            if !(element_prim.is_numeric() || element_prim == Primitive::Pointer) {
                return Err(mismatch(op, "comparison operands must be numbers or pointers", None, element, element, linkage));
            }
        }
        Opcode::AGetP => check_agetp(func, linkage, dest, dest_type, lhs_type, rhs_type, false)?,
        Opcode::APGetP => check_agetp(func, linkage, dest, dest_type, lhs_type, rhs_type, true)?,
        _ => unreachable!("non-`three`-shaped opcode reached check_three"),
    }
    Ok(())
}

fn check_agetp(
    func: &FunctionIr,
    linkage: &Linkage,
    dest: u32,
    dest_type: TypeId,
    lhs_type: TypeId,
    rhs_type: TypeId,
    via_pointer: bool,
) -> TacResult<()> {
    let op = if via_pointer { Opcode::APGetP } else { Opcode::AGetP };
    let array_type = if via_pointer {
        match linkage.type_info(lhs_type).payload {
            TypePayload::Pointer { target_type_id } if prim(linkage, lhs_type) == Primitive::Pointer => target_type_id,
            _ => return Err(mismatch(op, "apgetp requires a pointer-to-array lhs", Some(reg_ref(func, dest)), dest_type, lhs_type, linkage)),
        }
    } else {
        lhs_type
    };
    let element = match linkage.type_info(array_type).payload {
        TypePayload::Array { element_type_id, .. } if prim(linkage, array_type) == Primitive::Array => element_type_id,
        _ => return Err(mismatch(op, "getp requires an array operand", Some(reg_ref(func, dest)), dest_type, lhs_type, linkage)),
    };
    if !prim(linkage, rhs_type).is_integer() {
        return Err(mismatch(op, "expected integer index", Some(reg_ref(func, dest)), rhs_type, rhs_type, linkage));
    }
    match linkage.type_info(dest_type).payload {
        TypePayload::Pointer { target_type_id } if prim(linkage, dest_type) == Primitive::Pointer && target_type_id == element => Ok(()),
        _ => Err(mismatch(op, "dest must be pointer(element)", Some(reg_ref(func, dest)), element, dest_type, linkage)),
    }
}

fn check_fgetp(func: &FunctionIr, linkage: &Linkage, r: u32, st: u32, field: u32) -> TacResult<()> {
    let op = Opcode::FGetP;
    let dest_type = func.types[r as usize];
    let st_type = read_type(func, linkage, st, op)?;
    let info = linkage.type_info(st_type);
    if !matches!(info.prim, Primitive::Struct | Primitive::Union) {
        return Err(mismatch(op, "fgetp requires a struct or union operand", Some(reg_ref(func, r)), dest_type, st_type, linkage));
    }
    let (field_start, field_count) = match info.payload {
        TypePayload::Record { field_start, field_count } => (field_start, field_count),
        _ => unreachable!("struct/union prim always carries a Record payload"),
    };
    if field >= field_count {
        return Err(TacError::type_mismatch(op, format!("field index {field} out of range (0..{field_count})"), Some(reg_ref(func, r)), None, None));
    }
    let field_type = linkage.fields[(field_start + field) as usize].type_id;
    match linkage.type_info(dest_type).payload {
        TypePayload::Pointer { target_type_id } if prim(linkage, dest_type) == Primitive::Pointer && target_type_id == field_type => Ok(()),
        _ => Err(mismatch(op, "fgetp dest must be pointer(field_type)", Some(reg_ref(func, r)), field_type, dest_type, linkage)),
    }
}

fn check_call(func: &FunctionIr, linkage: &Linkage, op: Opcode, callee: u32) -> TacResult<()> {
    let callee_type = read_type(func, linkage, callee, op)?;
    let ok = match op {
        Opcode::Syscall => prim(linkage, callee_type).is_integer(),
        Opcode::Call => prim(linkage, callee_type) == Primitive::Pointer,
        _ => unreachable!("non-call opcode reached check_call"),
    };
    if !ok {
        let message = if op == Opcode::Syscall { "syscall callee must be an integer" } else { "call callee must be a pointer" };
        return Err(mismatch(op, message, None, callee_type, callee_type, linkage));
    }
    Ok(())
}

fn check_branch(func: &FunctionIr, linkage: &Linkage, cond: u32) -> TacResult<()> {
    let cond_type = read_type(func, linkage, cond, Opcode::Branch)?;
    if prim(linkage, cond_type) != Primitive::Boolean {
        return Err(mismatch(Opcode::Branch, "branch condition must be boolean", None, cond_type, cond_type, linkage));
    }
    Ok(())
}

fn check_return(func: &mut FunctionIr, linkage: &Linkage, value: Option<u32>, established: &mut bool) -> TacResult<()> {
    let this_type = match value {
        Some(word) => Some(read_type(func, linkage, word, Opcode::Return)?),
        None => None,
    };
    if !*established {
        func.has_return_type = this_type.is_some();
        func.return_type = this_type.unwrap_or(0);
        *established = true;
        return Ok(());
    }
    let consistent = match (func.has_return_type, this_type) {
        (true, Some(t)) => t == func.return_type,
        (false, None) => true,
        _ => false,
    };
    if consistent {
        Ok(())
    } else {
        Err(TacError::type_mismatch(
            Opcode::Return,
            "every return in a function must agree on value-or-void and on type",
            None,
            Some(&linkage.describe_type(func.return_type)),
            this_type.map(|t| linkage.describe_type(t)).as_deref(),
        ))
    }
}

fn check_constant_value(linkage: &Linkage, type_id: TypeId, value: &ConstValue, opcode: Opcode) -> TacResult<()> {
    let info = linkage.type_info(type_id);
    let ok = match value {
        ConstValue::Bool(_) => info.prim == Primitive::Boolean,
        ConstValue::Pointer(_) => info.prim == Primitive::Pointer,
        ConstValue::Float(_) => info.prim.is_float(),
        ConstValue::Int(i) => info.prim.is_float() || (info.prim.is_integer() && integer_fits(info.prim, *i)),
        ConstValue::Array(items) => {
            return check_array_constant(linkage, type_id, items, opcode);
        }
    };
    if ok {
        Ok(())
    } else {
        Err(TacError::ConstantNotRepresentable {
            opcode: opcode.name().to_string(),
            type_name: linkage.describe_type(type_id),
        })
    }
}

fn check_array_constant(linkage: &Linkage, type_id: TypeId, items: &[ConstValue], opcode: Opcode) -> TacResult<()> {
    let info = linkage.type_info(type_id);
    let (element_type_id, fixed_count) = match info.payload {
        TypePayload::Array { element_type_id, fixed_count } if info.prim == Primitive::Array => (element_type_id, fixed_count),
        _ => {
            return Err(TacError::ConstantNotRepresentable {
                opcode: opcode.name().to_string(),
                type_name: linkage.describe_type(type_id),
            })
        }
    };
    if items.len() as u64 != fixed_count {
        return Err(TacError::ConstantNotRepresentable {
            opcode: opcode.name().to_string(),
            type_name: linkage.describe_type(type_id),
        });
    }
    for item in items {
        check_constant_value(linkage, element_type_id, item, opcode)?;
    }
    Ok(())
}

fn integer_fits(prim: Primitive, value: i128) -> bool {
    let (lo, hi): (i128, i128) = match prim {
        Primitive::U8 => (0, u8::MAX as i128),
        Primitive::S8 => (i8::MIN as i128, i8::MAX as i128),
        Primitive::U16 => (0, u16::MAX as i128),
        Primitive::S16 => (i16::MIN as i128, i16::MAX as i128),
        Primitive::U32 => (0, u32::MAX as i128),
        Primitive::S32 => (i32::MIN as i128, i32::MAX as i128),
        Primitive::U64 => (0, u64::MAX as i128),
        Primitive::S64 => (i64::MIN as i128, i64::MAX as i128),
        _ => return false,
    };
    value >= lo && value <= hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::infer;
    use tac_ir::Linkage;
    use tac_parser::parse_into;

    fn checked(source: &str) -> TacResult<()> {
        let mut linkage = Linkage::new();
        let idx = parse_into(source, &mut linkage).unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        check(&mut func, &linkage)
    }

    #[test]
    fn identity_function_checks() {
        assert!(checked(
            "(link-name \"id\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) (return 0)"
        )
        .is_ok());
    }

    #[test]
    fn pointer_add_with_integer_rhs_checks() {
        let source = "(link-name \"f\") (parameter-count 1) \
            (type-prim I32 s32) (type-pointer PI32 I32) \
            (bind 0 PI32) (bind d PI32) \
            (pointer-add d 0 (I32 1)) (return d)";
        assert!(checked(source).is_ok());
    }

    #[test]
    fn pointer_add_with_pointer_rhs_fails() {
        let source = "(link-name \"f\") (parameter-count 1) \
            (type-prim I32 s32) (type-pointer PI32 I32) \
            (bind 0 PI32) (bind d PI32) \
            (pointer-add d 0 0) (return d)";
        assert!(matches!(checked(source), Err(TacError::TypeMismatch { .. })));
    }

    #[test]
    fn move_with_mismatched_types_fails() {
        let source = "(link-name \"f\") (parameter-count 2) \
            (type-prim I32 s32) (type-prim U8 u8) \
            (bind 0 I32) (bind 1 U8) (move 0 1) (return 0)";
        assert!(matches!(checked(source), Err(TacError::TypeMismatch { .. })));
    }
}
