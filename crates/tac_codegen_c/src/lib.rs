//! C lowering (§4.4): a single forward scan that writes portable C99 for
//! every real function in a linkage, plus the shared type-typedef prelude.

use std::fmt::Write as _;

use tac_common::{TacError, TacResult};
use tac_ir::{ConstValue, FunctionIr, Instruction, Linkage, Opcode, Operand, Primitive, TypeId, TypePayload};

const PRELUDE: &str = "#include <stdint.h>\n#include <stdbool.h>\n#include <sys/syscall.h>\n#include <unistd.h>\n#include <string.h>\n\ntypedef void _t0;\n";

/// Emit the full translation unit: prelude, type typedefs, then one block
/// per real function, in `linkage.functions()` order (§3.7, §5).
pub fn emit_c(linkage: &Linkage) -> TacResult<String> {
    if let Some(name) = linkage.unresolved_forward_refs().into_iter().next() {
        return Err(TacError::UnresolvedForwardRef { name });
    }

    let mut out = String::new();
    out.push_str(PRELUDE);
    out.push('\n');

    for id in 1..linkage.type_defs.len() as TypeId {
        write_typedef(&mut out, linkage, id)?;
    }
    out.push('\n');

    for func in linkage.real_functions() {
        emit_function(&mut out, linkage, func)?;
        out.push('\n');
    }

    log::debug!("emitted C for {} function(s)", linkage.real_functions().count());
    Ok(out)
}

fn write_typedef(out: &mut String, linkage: &Linkage, id: TypeId) -> TacResult<()> {
    let info = linkage.type_info(id);
    match info.prim {
        Primitive::Unknown => {
            // id 0, the reserved unknown primitive itself; every other
            // outstanding forward reference is rejected before this loop runs.
        }
        Primitive::U8 => writeln!(out, "typedef uint8_t _t{id};").unwrap(),
        Primitive::S8 => writeln!(out, "typedef int8_t _t{id};").unwrap(),
        Primitive::U16 => writeln!(out, "typedef uint16_t _t{id};").unwrap(),
        Primitive::S16 => writeln!(out, "typedef int16_t _t{id};").unwrap(),
        Primitive::U32 => writeln!(out, "typedef uint32_t _t{id};").unwrap(),
        Primitive::S32 => writeln!(out, "typedef int32_t _t{id};").unwrap(),
        Primitive::U64 => writeln!(out, "typedef uint64_t _t{id};").unwrap(),
        Primitive::S64 => writeln!(out, "typedef int64_t _t{id};").unwrap(),
        Primitive::F32 => writeln!(out, "typedef float _t{id};").unwrap(),
        Primitive::F64 => writeln!(out, "typedef double _t{id};").unwrap(),
        Primitive::Boolean => writeln!(out, "typedef bool _t{id};").unwrap(),
        Primitive::Void => writeln!(out, "typedef void _t{id};").unwrap(),
        Primitive::Pointer => {
            let TypePayload::Pointer { target_type_id } = info.payload else { unreachable!() };
            writeln!(out, "typedef _t{target_type_id} *_t{id};").unwrap();
        }
        Primitive::Array => {
            let TypePayload::Array { element_type_id, fixed_count } = info.payload else { unreachable!() };
            writeln!(out, "typedef struct {{ _t{element_type_id} els[{fixed_count}]; }} _t{id};").unwrap();
        }
        Primitive::Struct | Primitive::Union => {
            let TypePayload::Record { field_start, field_count } = info.payload else { unreachable!() };
            let keyword = if info.prim == Primitive::Struct { "struct" } else { "union" };
            write!(out, "typedef {keyword} {{ ").unwrap();
            if field_count == 0 {
                write!(out, "char _unused; ").unwrap();
            }
            for i in 0..field_count {
                let field_type = linkage.fields[(field_start + i) as usize].type_id;
                write!(out, "_t{field_type} _f{i}; ").unwrap();
            }
            writeln!(out, "}} _t{id};").unwrap();
        }
    }
    Ok(())
}

fn emit_function(out: &mut String, linkage: &Linkage, func: &FunctionIr) -> TacResult<()> {
    let name = func.link_name.as_deref().unwrap();
    let ret_type = if func.has_return_type {
        format!("_t{}", func.return_type)
    } else {
        "void".to_string()
    };

    let params = if func.parameter_count == 0 {
        "void".to_string()
    } else {
        (0..func.parameter_count)
            .map(|i| format!("_t{} _r{i}", func.types[i as usize]))
            .collect::<Vec<_>>()
            .join(", ")
    };
    writeln!(out, "{ret_type} {name}({params}) {{").unwrap();

    for i in func.parameter_count..func.register_count {
        writeln!(out, "    _t{} _r{i};", func.types[i as usize]).unwrap();
    }

    let mut index = 0;
    while index < func.instructions.len() {
        emit_instruction(out, linkage, func, index)?;
        index += 1;
    }

    writeln!(out, "}}").unwrap();
    Ok(())
}

fn emit_instruction(out: &mut String, linkage: &Linkage, func: &FunctionIr, index: usize) -> TacResult<()> {
    let instr = &func.instructions[index];
    if instr.pos().has_position() {
        writeln!(out, "#line {}", instr.pos().line).unwrap();
    }
    match instr {
        Instruction::Two { op, dest, src, .. } => emit_two(out, linkage, func, *op, *dest, *src),
        Instruction::Three { op, dest, lhs, rhs, .. } => emit_three(out, linkage, func, *op, *dest, *lhs, *rhs)?,
        Instruction::Field { r, st, field, .. } => emit_fgetp(out, linkage, func, *r, *st, *field),
        Instruction::Call { op, dest, callee, arg_count, .. } => {
            emit_call(out, linkage, func, *op, *dest, *callee, *arg_count, index)
        }
        Instruction::Arg { .. } => {}
        Instruction::Jump { to, .. } => {
            writeln!(out, "    goto _label_{to};").unwrap();
        }
        Instruction::Branch { op, cond, to, .. } => {
            let cond_text = render_operand(linkage, func, *cond);
            if matches!(op, Opcode::BranchNot) {
                writeln!(out, "    if (!({cond_text})) goto _label_{to};").unwrap();
            } else {
                writeln!(out, "    if ({cond_text}) goto _label_{to};").unwrap();
            }
        }
        Instruction::Return { value, .. } => match value {
            Some(word) => writeln!(out, "    return {};", render_operand(linkage, func, *word)).unwrap(),
            None => writeln!(out, "    return;").unwrap(),
        },
        Instruction::Label { id, .. } => {
            writeln!(out, "_label_{id}:;").unwrap();
        }
        Instruction::TypePrim { .. }
        | Instruction::TypePointer { .. }
        | Instruction::TypeArray { .. }
        | Instruction::TypeRecord { .. }
        | Instruction::TypeBind { .. } => {}
    }
    Ok(())
}

fn emit_two(out: &mut String, linkage: &Linkage, func: &FunctionIr, op: Opcode, dest: u32, src: u32) {
    let src_text = render_operand(linkage, func, src);
    match op {
        Opcode::Move => writeln!(out, "    _r{dest} = {src_text};").unwrap(),
        Opcode::Cast => {
            let dest_type = func.types[dest as usize];
            writeln!(out, "    _r{dest} = (_t{dest_type})({src_text});").unwrap()
        }
        Opcode::BNot => writeln!(out, "    _r{dest} = ~{src_text};").unwrap(),
        Opcode::Load => writeln!(out, "    _r{dest} = *{src_text};").unwrap(),
        Opcode::Store => writeln!(out, "    *_r{dest} = {src_text};").unwrap(),
        Opcode::Address => writeln!(out, "    _r{dest} = &{src_text};").unwrap(),
        other => unreachable!("non-`two` opcode {other:?} reached emit_two"),
    }
}

fn emit_three(out: &mut String, linkage: &Linkage, func: &FunctionIr, op: Opcode, dest: u32, lhs: u32, rhs: u32) -> TacResult<()> {
    match op {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Band | Opcode::Bor | Opcode::Bxor
        | Opcode::Shl | Opcode::Shr => emit_uniform_binary(out, linkage, func, op, dest, lhs, rhs),
        Opcode::PointerAdd | Opcode::PointerSubtract => {
            let c_op = if op == Opcode::PointerAdd { "+" } else { "-" };
            writeln!(
                out,
                "    _r{dest} = {} {c_op} {};",
                render_operand(linkage, func, lhs),
                render_operand(linkage, func, rhs)
            )
            .unwrap();
        }
        Opcode::Gt | Opcode::Lt | Opcode::Eq | Opcode::Neq | Opcode::Gte | Opcode::Lte => {
            emit_comparison(out, linkage, func, op, dest, lhs, rhs)?
        }
        Opcode::AGetP => emit_getp(out, linkage, func, dest, lhs, rhs, false),
        Opcode::APGetP => emit_getp(out, linkage, func, dest, lhs, rhs, true),
        other => unreachable!("non-`three` opcode {other:?} reached emit_three"),
    }
    Ok(())
}

fn c_binop(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Band => "&",
        Opcode::Bor => "|",
        Opcode::Bxor => "^",
        Opcode::Shl => "<<",
        Opcode::Shr => ">>",
        other => unreachable!("{other:?} is not a uniform-binary opcode"),
    }
}

/// The scalarized shape is a pointer-to-non-array on all three operands
/// (`tac_scalarize` rewrites in-place with `agetp`/`apgetp`); codegen
/// reads that as "dereference both sides, compute, store through dest"
/// rather than literal pointer arithmetic.
fn emit_uniform_binary(out: &mut String, linkage: &Linkage, func: &FunctionIr, op: Opcode, dest: u32, lhs: u32, rhs: u32) {
    let dest_type = func.types[dest as usize];
    let info = linkage.type_info(dest_type);
    let c_op = c_binop(op);
    match (&info.prim, &info.payload) {
        (Primitive::Array, TypePayload::Array { .. }) => {
            emit_array_loop(
                out,
                linkage,
                dest_type,
                &format!("_r{dest}"),
                &render_operand(linkage, func, lhs),
                &render_operand(linkage, func, rhs),
                c_op,
                0,
            );
        }
        (Primitive::Pointer, TypePayload::Pointer { target_type_id })
            if matches!(linkage.type_info(*target_type_id).prim, Primitive::Array) =>
        {
            emit_array_loop(
                out,
                linkage,
                *target_type_id,
                &format!("(*_r{dest})"),
                &format!("(*{})", render_operand(linkage, func, lhs)),
                &format!("(*{})", render_operand(linkage, func, rhs)),
                c_op,
                0,
            );
        }
        (Primitive::Pointer, TypePayload::Pointer { .. }) => {
            // Post-scalarization element-pointer form: *dest = *lhs op *rhs.
            writeln!(
                out,
                "    *_r{dest} = *{} {c_op} *{};",
                render_operand(linkage, func, lhs),
                render_operand(linkage, func, rhs)
            )
            .unwrap();
        }
        _ => {
            writeln!(
                out,
                "    _r{dest} = {} {c_op} {};",
                render_operand(linkage, func, lhs),
                render_operand(linkage, func, rhs)
            )
            .unwrap();
        }
    }
}

fn emit_array_loop(out: &mut String, linkage: &Linkage, array_type: TypeId, dest_base: &str, lhs_base: &str, rhs_base: &str, c_op: &str, depth: u32) {
    let info = linkage.type_info(array_type);
    let TypePayload::Array { element_type_id, fixed_count } = info.payload else {
        unreachable!("emit_array_loop called on a non-array type")
    };
    writeln!(out, "    for (long _j{depth} = 0; _j{depth} < {fixed_count}; _j{depth}++) {{").unwrap();
    let dest_next = format!("{dest_base}.els[_j{depth}]");
    let lhs_next = format!("{lhs_base}.els[_j{depth}]");
    let rhs_next = format!("{rhs_base}.els[_j{depth}]");
    if linkage.type_info(element_type_id).prim == Primitive::Array {
        emit_array_loop(out, linkage, element_type_id, &dest_next, &lhs_next, &rhs_next, c_op, depth + 1);
    } else {
        writeln!(out, "        {dest_next} = {lhs_next} {c_op} {rhs_next};").unwrap();
    }
    writeln!(out, "    }}").unwrap();
}

fn emit_comparison(out: &mut String, linkage: &Linkage, func: &FunctionIr, op: Opcode, dest: u32, lhs: u32, rhs: u32) -> TacResult<()> {
    let lhs_type = operand_type(func, lhs);
    let lhs_info = linkage.type_info(lhs_type);
    let descends_array = matches!(lhs_info.prim, Primitive::Array)
        || matches!(
            (&lhs_info.prim, &lhs_info.payload),
            (Primitive::Pointer, TypePayload::Pointer { target_type_id }) if linkage.type_info(*target_type_id).prim == Primitive::Array
        );
    if descends_array {
        if !matches!(op, Opcode::Eq | Opcode::Neq) {
            return Err(TacError::UnsupportedOnTarget {
                target: "c".to_string(),
                opcode: op.name().to_string(),
                reason: "arrays have no natural ordering; only eq/neq lower to memcmp".to_string(),
            });
        }
        let cmp = if op == Opcode::Eq { "== 0" } else { "!= 0" };
        writeln!(
            out,
            "    _r{dest} = (memcmp(&{}, &{}, sizeof(_t{lhs_type})) {cmp});",
            render_operand(linkage, func, lhs),
            render_operand(linkage, func, rhs),
        )
        .unwrap();
        return Ok(());
    }
    let c_op = match op {
        Opcode::Gt => ">",
        Opcode::Lt => "<",
        Opcode::Eq => "==",
        Opcode::Neq => "!=",
        Opcode::Gte => ">=",
        Opcode::Lte => "<=",
        other => unreachable!("{other:?} is not a comparison opcode"),
    };
    writeln!(
        out,
        "    _r{dest} = ({} {c_op} {});",
        render_operand(linkage, func, lhs),
        render_operand(linkage, func, rhs)
    )
    .unwrap();
    Ok(())
}

fn emit_getp(out: &mut String, linkage: &Linkage, func: &FunctionIr, dest: u32, lhs: u32, rhs: u32, via_pointer: bool) {
    let base = render_operand(linkage, func, lhs);
    let idx = render_operand(linkage, func, rhs);
    let access = if via_pointer { format!("{base}->els[{idx}]") } else { format!("{base}.els[{idx}]") };
    writeln!(out, "    _r{dest} = &({access});").unwrap();
}

fn emit_fgetp(out: &mut String, linkage: &Linkage, func: &FunctionIr, r: u32, st: u32, field: u32) {
    let base = render_operand(linkage, func, st);
    writeln!(out, "    _r{r} = &({base}._f{field});").unwrap();
}

fn emit_call(out: &mut String, linkage: &Linkage, func: &FunctionIr, op: Opcode, dest: Option<u32>, callee: u32, arg_count: u32, call_index: usize) {
    let args = func.call_arguments(call_index, arg_count);
    let rendered_args: Vec<String> = args.iter().map(|&word| render_operand(linkage, func, word)).collect();
    let call_expr = if op == Opcode::Syscall {
        format!("syscall({}{})", render_operand(linkage, func, callee), comma_prefixed(&rendered_args))
    } else {
        format!("{}({})", render_operand(linkage, func, callee), rendered_args.join(", "))
    };
    match dest {
        Some(d) => writeln!(out, "    _r{d} = {call_expr};").unwrap(),
        None => writeln!(out, "    {call_expr};").unwrap(),
    }
}

fn comma_prefixed(args: &[String]) -> String {
    if args.is_empty() {
        String::new()
    } else {
        format!(", {}", args.join(", "))
    }
}

fn operand_type(func: &FunctionIr, word: u32) -> TypeId {
    match Operand::decode(word) {
        Operand::Register(id) => func.types[id as usize],
        Operand::Constant(idx) => func.constants.get(idx).expect("interned constant must exist").type_id,
    }
}

fn render_operand(linkage: &Linkage, func: &FunctionIr, word: u32) -> String {
    match Operand::decode(word) {
        Operand::Register(id) => format!("_r{id}"),
        Operand::Constant(idx) => {
            let constant = func.constants.get(idx).expect("interned constant must exist");
            render_constant(linkage, constant.type_id, &constant.value)
        }
    }
}

fn render_constant(linkage: &Linkage, type_id: TypeId, value: &ConstValue) -> String {
    match value {
        ConstValue::Bool(b) => b.to_string(),
        ConstValue::Int(i) => i.to_string(),
        ConstValue::Float(f) => render_float(*f),
        ConstValue::Pointer(s) => format!("\"{}\"", escape_c_string(s)),
        ConstValue::Array(items) => {
            let TypePayload::Array { element_type_id, .. } = linkage.type_info(type_id).payload else {
                unreachable!("array constant must carry an array type")
            };
            let rendered: Vec<String> = items.iter().map(|item| render_constant(linkage, element_type_id, item)).collect();
            format!("(_t{type_id}){{{{{}}}}}", rendered.join(", "))
        }
    }
}

fn render_float(f: f64) -> String {
    let text = format!("{f}");
    if text.contains('.') || text.contains('e') || text.contains("inf") || text.contains("nan") {
        text
    } else {
        format!("{text}.0")
    }
}

fn escape_c_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tac_parser::parse_into;
    use tac_scalarize::scalarize;
    use tac_typeck::{check, infer};

    fn emitted(source: &str) -> String {
        let mut linkage = Linkage::new();
        let idx = parse_into(source, &mut linkage).unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        check(&mut func, &linkage).unwrap();
        *linkage.functions_mut().get_mut(idx).unwrap() = func;
        emit_c(&linkage).unwrap()
    }

    #[test]
    fn identity_function_emits_expected_c() {
        let text = emitted("(link-name \"id\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) (return 0)");
        assert!(text.contains("typedef int32_t _t1;"));
        assert!(text.contains("_t1 id(_t1 _r0) {"));
        assert!(text.contains("return _r0;"));
    }

    #[test]
    fn constant_operand_renders_inline() {
        let text = emitted(
            "(link-name \"f\") (parameter-count 0) (type-prim I32 s32) \
             (add a (I32 1) (I32 1)) (return a)",
        );
        assert!(text.contains("1 + 1"));
    }

    #[test]
    fn scalarized_array_add_emits_pointer_dereference_form() {
        let mut linkage = Linkage::new();
        let idx = parse_into(
            "(link-name \"vec_add\") (parameter-count 2) \
             (type-prim I32 s32) (type-array A4 I32 4) (type-pointer PA4 A4) \
             (bind 0 PA4) (bind 1 PA4) (add 0 0 1) (return)",
            &mut linkage,
        )
        .unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        check(&mut func, &linkage).unwrap();
        scalarize(&mut func, &mut linkage).unwrap();
        check(&mut func, &linkage).unwrap();
        *linkage.functions_mut().get_mut(idx).unwrap() = func;

        let text = emit_c(&linkage).unwrap();
        assert!(text.contains("= &("));
        assert!(text.contains(" + "));
        assert!(!text.contains("for (long _j0"), "scalarized IR should not re-emit a native array loop");
    }

    #[test]
    fn unscalarized_array_add_emits_native_loop() {
        let text = emitted(
            "(link-name \"vec_add\") (parameter-count 2) \
             (type-prim I32 s32) (type-array A4 I32 4) (type-pointer PA4 A4) \
             (bind 0 PA4) (bind 1 PA4) (add 0 0 1) (return)",
        );
        assert!(text.contains("for (long _j0 = 0; _j0 < 4; _j0++)"));
        assert!(text.contains(".els[_j0]"));
    }

    #[test]
    fn unresolved_forward_reference_is_rejected_before_lowering() {
        // `NodePtr` is concretized by its own `type-pointer` definition once
        // `infer` runs, but its target `Ghost` is never the subject of any
        // type-forming instruction, so it stays an unresolved forward
        // reference forever.
        let mut linkage = Linkage::new();
        let idx = parse_into("(type-pointer NodePtr Ghost)", &mut linkage).unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        *linkage.functions_mut().get_mut(idx).unwrap() = func;

        let err = emit_c(&linkage).unwrap_err();
        assert!(matches!(err, TacError::UnresolvedForwardRef { name } if name == "Ghost"));
    }
}
