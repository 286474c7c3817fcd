//! Surface-syntax writer (§6.1 `to-ir`, §6.2 round-trip).
//!
//! Emits a linkage back out as IR tuple text: a leading "typedefs" section
//! (every type-forming instruction, in the order functions were parsed),
//! followed by one body per real function. Label spelling is not
//! preserved — labels re-emit as `:L<id>` — but the numbering is stable
//! across a parse/print/parse round trip, which is what P5 cares about.

use tac_ir::{ConstValue, FunctionIr, Instruction, Linkage, Operand};

pub fn print_linkage(linkage: &Linkage) -> String {
    let mut out = String::new();
    for func in linkage.functions() {
        for instr in &func.instructions {
            if let Some(text) = render_type_form(instr, linkage) {
                out.push_str(&text);
                out.push('\n');
            }
        }
    }
    for func in linkage.real_functions() {
        out.push_str(&print_function_body(func, linkage));
    }
    out
}

pub fn print_function_body(func: &FunctionIr, linkage: &Linkage) -> String {
    let mut out = String::new();
    if let Some(name) = &func.link_name {
        out.push_str(&format!("(link-name {name:?})\n"));
    }
    out.push_str(&format!("(parameter-count {})\n", func.parameter_count));
    if func.calling_convention != tac_ir::CallingConvention::default() {
        out.push_str(&format!("(calling-convention :{})\n", func.calling_convention.name()));
    }
    for (idx, instr) in func.instructions.iter().enumerate() {
        if let Some(text) = render_body_form(idx, instr, func, linkage) {
            out.push_str(&text);
            out.push('\n');
        }
    }
    out
}

fn render_type_form(instr: &Instruction, linkage: &Linkage) -> Option<String> {
    match instr {
        Instruction::TypePrim { type_id, prim, .. } => {
            Some(format!("(type-prim {} {})", type_ref(linkage, *type_id), prim.name()))
        }
        Instruction::TypePointer { type_id, target, .. } => Some(format!(
            "(type-pointer {} {})",
            type_ref(linkage, *type_id),
            type_ref(linkage, *target)
        )),
        Instruction::TypeArray { type_id, element, count, .. } => Some(format!(
            "(type-array {} {} {})",
            type_ref(linkage, *type_id),
            type_ref(linkage, *element),
            count
        )),
        Instruction::TypeRecord {
            type_id,
            is_union,
            field_start,
            field_count,
            ..
        } => {
            let op = if *is_union { "type-union" } else { "type-struct" };
            let fields: Vec<String> = linkage.fields[*field_start as usize..(*field_start + *field_count) as usize]
                .iter()
                .map(|f| type_ref(linkage, f.type_id))
                .collect();
            Some(format!("({op} {} {})", type_ref(linkage, *type_id), fields.join(" ")))
        }
        _ => None,
    }
}

fn render_body_form(idx: usize, instr: &Instruction, func: &FunctionIr, linkage: &Linkage) -> Option<String> {
    match instr {
        Instruction::Label { id, .. } => Some(format!(":L{id}")),
        Instruction::Two { op, dest, src, .. } => {
            Some(format!("({} {} {})", op.name(), reg(func, *dest), operand(func, *src)))
        }
        Instruction::Three { op, dest, lhs, rhs, .. } => Some(format!(
            "({} {} {} {})",
            op.name(),
            reg(func, *dest),
            operand(func, *lhs),
            operand(func, *rhs)
        )),
        Instruction::Field { r, st, field, .. } => {
            Some(format!("(fgetp {} {} {})", reg(func, *r), operand(func, *st), field))
        }
        Instruction::Call { op, cc, dest, callee, arg_count, .. } => {
            let dest_text = dest.map(|d| reg(func, d)).unwrap_or_else(|| "nil".to_string());
            let args: Vec<String> = func
                .call_arguments(idx, *arg_count)
                .into_iter()
                .map(|a| operand(func, a))
                .collect();
            Some(format!(
                "({} :{} {} {} {})",
                op.name(),
                cc.name(),
                dest_text,
                operand(func, *callee),
                args.join(" ")
            ))
        }
        Instruction::Arg { .. } => None,
        Instruction::Jump { to, .. } => Some(format!("(jump :L{to})")),
        Instruction::Branch { op, cond, to, .. } => {
            Some(format!("({} {} :L{to})", op.name(), operand(func, *cond)))
        }
        Instruction::Return { value, .. } => match value {
            Some(v) => Some(format!("(return {})", operand(func, *v))),
            None => Some("(return)".to_string()),
        },
        Instruction::TypeBind { dest, type_id, .. } => {
            Some(format!("(bind {} {})", reg(func, *dest), type_ref(linkage, *type_id)))
        }
        Instruction::TypePrim { .. }
        | Instruction::TypePointer { .. }
        | Instruction::TypeArray { .. }
        | Instruction::TypeRecord { .. } => None,
    }
}

fn reg(func: &FunctionIr, id: u32) -> String {
    func.register_name(id).map(str::to_string).unwrap_or_else(|| id.to_string())
}

fn operand(func: &FunctionIr, word: u32) -> String {
    match Operand::decode(word) {
        Operand::Register(id) => reg(func, id),
        Operand::Constant(idx) => {
            let constant = func.constants.get(idx).expect("interned constant must exist");
            format!("({} {})", constant.type_id, render_const_value(&constant.value))
        }
    }
}

fn render_const_value(value: &ConstValue) -> String {
    match value {
        ConstValue::Bool(b) => b.to_string(),
        ConstValue::Int(i) => i.to_string(),
        ConstValue::Float(f) => f.to_string(),
        ConstValue::Pointer(s) => format!("{s:?}"),
        ConstValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(render_const_value).collect();
            format!("({})", inner.join(" "))
        }
    }
}

fn type_ref(linkage: &Linkage, id: tac_ir::TypeId) -> String {
    linkage.type_name(id).map(str::to_string).unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_into;

    #[test]
    fn round_trips_identity_function() {
        let mut linkage = Linkage::new();
        parse_into(
            "(link-name \"id\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) (return 0)",
            &mut linkage,
        )
        .unwrap();
        let text = print_linkage(&linkage);
        assert!(text.contains("(type-prim"));
        assert!(text.contains("(link-name \"id\")"));

        // A single-function linkage's combined typedefs + body dump is
        // itself a valid flat form sequence and reparses as one function.
        let mut reparsed = Linkage::new();
        parse_into(&text, &mut reparsed).unwrap();
        assert_eq!(reparsed.real_functions().count(), 1);
    }

    #[test]
    fn round_trips_function_with_branch_and_label() {
        // The label is interned (and minted a `LabelId`) at the `branch`
        // site, well before its defining `label` instruction's own index —
        // the label must print under its `LabelId`, not its instruction
        // index, or the branch and label disagree on which `:L<n>` they mean.
        let mut linkage = Linkage::new();
        parse_into(
            "(link-name \"f\") (parameter-count 2) (type-prim I32 s32) \
             (bind 0 I32) (bind 1 I32) (gt 0 0 1) (branch 0 :target) \
             (label :target) (return 0)",
            &mut linkage,
        )
        .unwrap();
        let text = print_linkage(&linkage);

        let mut reparsed = Linkage::new();
        parse_into(&text, &mut reparsed).unwrap();
        let func = reparsed.real_functions().next().expect("one real function");
        assert!(func.labels.all_bound(), "round-tripped text: {text}");
        for id in 0..func.labels.len() as u32 {
            let target = func.labels.target_index(id).unwrap();
            assert!(target <= func.instructions.len());
        }
    }
}
