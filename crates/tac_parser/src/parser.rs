//! The IR parser (§4.1): turns a flat sequence of surface forms into one
//! `FunctionIr`, registered into a shared `Linkage`.
//!
//! One source text is one call to the host-facing `asm` operation (§6.1):
//! it parses exactly one function (or type-only module) and returns its
//! index in the linkage. Multiple files sharing a `Linkage` can reference
//! each other's types by name.

use crate::sexpr::{self, SExpr};
use hashbrown::HashMap;
use tac_common::{SourcePos, TacError, TacResult};
use tac_ir::{
    CallingConvention, ConstValue, FunctionIr, Instruction, Linkage, Opcode, Primitive, TypeId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeMode {
    /// The name must already have been mentioned (§4.1 "reference").
    Reference,
    /// The name may be mentioned for the first time here (§4.1
    /// "definition" and "forward-ref" share this code path: both only
    /// allocate an id at parse time, concreteness is established later by
    /// `tac_typeck::infer`).
    ForwardRef,
}

struct Meta {
    link_name_seen: bool,
    parameter_count_seen: bool,
}

/// Parse one function/module from `source` and register it into `linkage`,
/// returning its index.
pub fn parse_into(source: &str, linkage: &mut Linkage) -> TacResult<usize> {
    let forms = sexpr::read_all(source)?;
    let mut names: HashMap<String, u32> = HashMap::new();
    let mut func = FunctionIr::new();
    let mut meta = Meta {
        link_name_seen: false,
        parameter_count_seen: false,
    };

    for (expr, pos) in &forms {
        match expr {
            SExpr::Keyword(name) => bind_label(&mut func, name, *pos)?,
            SExpr::List(items) if !items.is_empty() => {
                dispatch(items, *pos, &mut names, &mut func, linkage, &mut meta)?;
            }
            other => {
                return Err(TacError::MalformedTuple {
                    tuple: other.render(),
                })
            }
        }
    }

    validate(&func)?;
    log::debug!(
        "parsed {} ({} instructions)",
        func.link_name.as_deref().unwrap_or("<type-only module>"),
        func.instructions.len()
    );
    Ok(linkage.register(func))
}

fn validate(func: &FunctionIr) -> TacResult<()> {
    if func.is_real_function() {
        if func.parameter_count > func.register_count {
            return Err(TacError::TooFewRegistersForParams {
                name: func.link_name.clone().unwrap(),
                param_count: func.parameter_count,
                register_count: func.register_count,
            });
        }
        let terminates = func.instructions.last().is_some_and(Instruction::terminates_function);
        if !terminates {
            return Err(TacError::UnterminatedFunction {
                name: func.link_name.clone().unwrap(),
            });
        }
    } else {
        let violates_type_only = func.parameter_count > 0
            || !func.constants.is_empty()
            || func.instructions.iter().any(Instruction::is_executable);
        if violates_type_only {
            return Err(TacError::ExecutableInTypeOnlyModule {
                name: "<type-only module>".to_string(),
            });
        }
    }
    Ok(())
}

fn dispatch(
    items: &[SExpr],
    pos: SourcePos,
    names: &mut HashMap<String, u32>,
    func: &mut FunctionIr,
    linkage: &mut Linkage,
    meta: &mut Meta,
) -> TacResult<()> {
    let head = match &items[0] {
        SExpr::Symbol(s) => s.clone(),
        other => {
            return Err(TacError::MalformedTuple {
                tuple: other.render(),
            })
        }
    };

    match head.as_str() {
        "link-name" => {
            expect_arity(&head, items, 1)?;
            if meta.link_name_seen {
                return Err(TacError::MalformedTuple {
                    tuple: "link-name may appear at most once".to_string(),
                });
            }
            match &items[1] {
                SExpr::Str(s) => func.link_name = Some(s.clone()),
                other => {
                    return Err(TacError::MalformedTuple {
                        tuple: other.render(),
                    })
                }
            }
            meta.link_name_seen = true;
            Ok(())
        }
        "parameter-count" => {
            expect_arity(&head, items, 1)?;
            if meta.parameter_count_seen {
                return Err(TacError::MalformedTuple {
                    tuple: "parameter-count may appear at most once".to_string(),
                });
            }
            match &items[1] {
                SExpr::Int(n) if *n >= 0 => func.parameter_count = *n as u32,
                other => {
                    return Err(TacError::MalformedTuple {
                        tuple: other.render(),
                    })
                }
            }
            meta.parameter_count_seen = true;
            Ok(())
        }
        "calling-convention" => {
            expect_arity(&head, items, 1)?;
            func.calling_convention = decode_cc(&items[1])?;
            Ok(())
        }
        _ => {
            let op = Opcode::from_name(&head).ok_or_else(|| TacError::UnknownOpcode {
                opcode: head.clone(),
            })?;
            parse_instruction(op, &head, items, pos, names, func, linkage)
        }
    }
}

fn parse_instruction(
    op: Opcode,
    name: &str,
    items: &[SExpr],
    pos: SourcePos,
    names: &mut HashMap<String, u32>,
    func: &mut FunctionIr,
    linkage: &mut Linkage,
) -> TacResult<()> {
    use Opcode::*;
    match op {
        Move | Cast | BNot | Load | Store | Address => {
            expect_arity(name, items, 2)?;
            let dest = decode_register(&items[1], names, func)?;
            let src = decode_read(&items[2], names, func, linkage)?;
            func.instructions.push(Instruction::Two { op, dest, src, pos });
        }
        Add | Sub | Mul | Div | Band | Bor | Bxor | Shl | Shr | PointerAdd | PointerSubtract
        | Gt | Lt | Eq | Neq | Gte | Lte | AGetP | APGetP => {
            expect_arity(name, items, 3)?;
            let dest = decode_register(&items[1], names, func)?;
            let lhs = decode_read(&items[2], names, func, linkage)?;
            let rhs = decode_read(&items[3], names, func, linkage)?;
            func.instructions.push(Instruction::Three { op, dest, lhs, rhs, pos });
        }
        FGetP => {
            expect_arity(name, items, 3)?;
            let r = decode_register(&items[1], names, func)?;
            let st = decode_read(&items[2], names, func, linkage)?;
            let field = decode_field_index(&items[3])?;
            func.instructions.push(Instruction::Field { r, st, field, pos });
        }
        Call | Syscall => {
            if items.len() < 4 {
                return Err(TacError::WrongArity {
                    opcode: name.to_string(),
                    expected: 3,
                    actual: items.len() - 1,
                });
            }
            let cc = decode_cc(&items[1])?;
            let dest = decode_register_or_nil(&items[2], names, func)?;
            let callee = decode_read(&items[3], names, func, linkage)?;
            let mut args = Vec::with_capacity(items.len() - 4);
            for a in &items[4..] {
                args.push(decode_read(a, names, func, linkage)?);
            }
            let arg_count = args.len() as u32;
            func.instructions.push(Instruction::Call { op, cc, dest, callee, arg_count, pos });
            push_overflow(func, &args, pos);
        }
        Jump => {
            expect_arity(name, items, 1)?;
            let to = decode_label(&items[1], func)?;
            func.instructions.push(Instruction::Jump { to, pos });
        }
        Branch | BranchNot => {
            expect_arity(name, items, 2)?;
            let cond = decode_read(&items[1], names, func, linkage)?;
            let to = decode_label(&items[2], func)?;
            func.instructions.push(Instruction::Branch { op, cond, to, pos });
        }
        Return => {
            if items.len() > 2 {
                return Err(TacError::WrongArity {
                    opcode: name.to_string(),
                    expected: 1,
                    actual: items.len() - 1,
                });
            }
            let value = if items.len() == 2 {
                Some(decode_read(&items[1], names, func, linkage)?)
            } else {
                None
            };
            func.instructions.push(Instruction::Return { value, pos });
        }
        Label => {
            expect_arity(name, items, 1)?;
            match &items[1] {
                SExpr::Keyword(n) => bind_label(func, n, pos)?,
                other => {
                    return Err(TacError::MalformedTuple {
                        tuple: other.render(),
                    })
                }
            }
        }
        TypePrim => {
            expect_arity(name, items, 2)?;
            let type_id = resolve_type_operand(&items[1], TypeMode::ForwardRef, linkage)?;
            let prim = decode_prim(&items[2])?;
            if !prim.is_plain() {
                return Err(TacError::MalformedTuple {
                    tuple: format!("type-prim: `{}` may not be introduced via type-prim", prim.name()),
                });
            }
            func.instructions.push(Instruction::TypePrim { type_id, prim, pos });
        }
        TypePointer => {
            expect_arity(name, items, 2)?;
            let type_id = resolve_type_operand(&items[1], TypeMode::ForwardRef, linkage)?;
            let target = resolve_type_operand(&items[2], TypeMode::ForwardRef, linkage)?;
            func.instructions.push(Instruction::TypePointer { type_id, target, pos });
        }
        TypeArray => {
            expect_arity(name, items, 3)?;
            let type_id = resolve_type_operand(&items[1], TypeMode::ForwardRef, linkage)?;
            let element = resolve_type_operand(&items[2], TypeMode::ForwardRef, linkage)?;
            let count = decode_u64(&items[3])?;
            func.instructions.push(Instruction::TypeArray { type_id, element, count, pos });
        }
        TypeStruct | TypeUnion => {
            if items.len() < 2 {
                return Err(TacError::WrongArity {
                    opcode: name.to_string(),
                    expected: 1,
                    actual: items.len() - 1,
                });
            }
            let type_id = resolve_type_operand(&items[1], TypeMode::ForwardRef, linkage)?;
            let mut field_types = Vec::with_capacity(items.len() - 2);
            for f in &items[2..] {
                field_types.push(resolve_type_operand(f, TypeMode::ForwardRef, linkage)?);
            }
            let (field_start, field_count) = linkage.push_fields(&field_types);
            let is_union = matches!(op, Opcode::TypeUnion);
            func.instructions.push(Instruction::TypeRecord {
                type_id,
                is_union,
                field_start,
                field_count,
                pos,
            });
            push_overflow(func, &field_types, pos);
        }
        TypeBind => {
            expect_arity(name, items, 2)?;
            let dest = decode_register(&items[1], names, func)?;
            let type_id = resolve_type_operand(&items[2], TypeMode::Reference, linkage)?;
            func.instructions.push(Instruction::TypeBind { dest, type_id, pos });
        }
        Arg => {
            return Err(TacError::MalformedTuple {
                tuple: "`arg` is a synthetic pseudo-instruction, it cannot appear directly in source".to_string(),
            })
        }
    }
    Ok(())
}

fn expect_arity(name: &str, items: &[SExpr], expected: usize) -> TacResult<()> {
    let actual = items.len() - 1;
    if actual != expected {
        return Err(TacError::WrongArity {
            opcode: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn bind_label(func: &mut FunctionIr, name: &str, pos: SourcePos) -> TacResult<()> {
    let id = func.labels.intern(name);
    if func.labels.is_bound(id) {
        return Err(TacError::LabelRedefined { name: name.to_string() });
    }
    let idx = func.instructions.len();
    func.labels.bind(id, idx);
    func.instructions.push(Instruction::Label { id, pos });
    Ok(())
}

fn push_overflow(func: &mut FunctionIr, values: &[u32], pos: SourcePos) {
    for chunk in values.chunks(3) {
        let mut args: [Option<u32>; 3] = [None, None, None];
        for (slot, &value) in args.iter_mut().zip(chunk) {
            *slot = Some(value);
        }
        func.instructions.push(Instruction::Arg { args, pos });
    }
}

fn decode_register(expr: &SExpr, names: &mut HashMap<String, u32>, func: &mut FunctionIr) -> TacResult<u32> {
    match expr {
        SExpr::Symbol(s) => {
            if let Some(&id) = names.get(s) {
                Ok(id)
            } else {
                let id = func.register_count;
                func.ensure_register(id);
                func.set_register_name(id, s);
                names.insert(s.clone(), id);
                Ok(id)
            }
        }
        SExpr::Int(i) if *i >= 0 => {
            let id = *i as u32;
            func.ensure_register(id);
            Ok(id)
        }
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn decode_register_or_nil(
    expr: &SExpr,
    names: &mut HashMap<String, u32>,
    func: &mut FunctionIr,
) -> TacResult<Option<u32>> {
    match expr {
        SExpr::Nil => Ok(None),
        other => Ok(Some(decode_register(other, names, func)?)),
    }
}

fn decode_read(
    expr: &SExpr,
    names: &mut HashMap<String, u32>,
    func: &mut FunctionIr,
    linkage: &mut Linkage,
) -> TacResult<u32> {
    match expr {
        SExpr::Symbol(_) | SExpr::Int(_) => decode_register(expr, names, func),
        SExpr::List(pair) if pair.len() == 2 => {
            let type_id = resolve_type_operand(&pair[0], TypeMode::Reference, linkage)?;
            let value = sexpr_to_const_value(&pair[1])?;
            let idx = func.constants.intern(type_id, value);
            Ok(tac_ir::Operand::Constant(idx).encode())
        }
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn sexpr_to_const_value(expr: &SExpr) -> TacResult<ConstValue> {
    match expr {
        SExpr::Bool(b) => Ok(ConstValue::Bool(*b)),
        SExpr::Int(i) => Ok(ConstValue::Int(*i)),
        SExpr::Float(f) => Ok(ConstValue::Float(*f)),
        SExpr::Str(s) => Ok(ConstValue::Pointer(s.clone())),
        SExpr::Symbol(s) => Ok(ConstValue::Pointer(s.clone())),
        SExpr::List(items) => {
            let elems = items.iter().map(sexpr_to_const_value).collect::<TacResult<Vec<_>>>()?;
            Ok(ConstValue::Array(elems))
        }
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn resolve_type_operand(expr: &SExpr, mode: TypeMode, linkage: &mut Linkage) -> TacResult<TypeId> {
    match expr {
        SExpr::Symbol(name) => match mode {
            TypeMode::Reference => linkage.reference_type(name),
            TypeMode::ForwardRef => Ok(linkage.forward_reference_type(name)),
        },
        SExpr::Int(i) if *i >= 0 => Ok(*i as TypeId),
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn decode_label(expr: &SExpr, func: &mut FunctionIr) -> TacResult<u32> {
    match expr {
        SExpr::Keyword(name) => Ok(func.labels.intern(name)),
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn decode_prim(expr: &SExpr) -> TacResult<Primitive> {
    match expr {
        SExpr::Symbol(name) => {
            Primitive::from_name(name).ok_or_else(|| TacError::UnknownPrimitive { name: name.clone() })
        }
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn decode_cc(expr: &SExpr) -> TacResult<CallingConvention> {
    match expr {
        SExpr::Keyword(name) => CallingConvention::from_name(name)
            .ok_or_else(|| TacError::UnknownCallingConvention { name: name.clone() }),
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn decode_u64(expr: &SExpr) -> TacResult<u64> {
    match expr {
        SExpr::Int(i) if *i >= 0 => Ok(*i as u64),
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}

fn decode_field_index(expr: &SExpr) -> TacResult<u32> {
    match expr {
        SExpr::Int(i) if *i >= 0 => Ok(*i as u32),
        other => Err(TacError::MalformedTuple {
            tuple: other.render(),
        }),
    }
}
