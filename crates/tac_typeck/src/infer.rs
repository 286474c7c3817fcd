//! Type inference (§4.2 first half): a single forward pass that populates
//! `linkage.type_defs` from the type-forming instructions already parsed
//! into a function, and binds register types from `bind`.

use tac_common::{RegisterRef, TacError, TacResult};
use tac_ir::{FunctionIr, Instruction, Linkage, TypeInfo};

/// Walk `func`'s instructions once, defining every type id they introduce
/// and recording every `bind`. Safe to call multiple times across a
/// linkage as new functions are parsed in (§4.2: "(D), (E), (F) may run
/// multiple times as new functions are added").
pub fn infer(func: &mut FunctionIr, linkage: &mut Linkage) -> TacResult<()> {
    for instr in &func.instructions {
        match *instr {
            Instruction::TypePrim { type_id, prim, .. } => {
                linkage.define_type_by_id(type_id, TypeInfo::plain(prim))?;
            }
            Instruction::TypePointer { type_id, target, .. } => {
                linkage.define_type_by_id(type_id, TypeInfo::pointer(target))?;
            }
            Instruction::TypeArray { type_id, element, count, .. } => {
                linkage.define_type_by_id(type_id, TypeInfo::array(element, count))?;
            }
            Instruction::TypeRecord {
                type_id,
                is_union,
                field_start,
                field_count,
                ..
            } => {
                linkage.define_type_by_id(type_id, TypeInfo::record(is_union, field_start, field_count))?;
            }
            Instruction::TypeBind { dest, type_id, .. } => {
                func.types[dest as usize] = type_id;
            }
            _ => {}
        }
    }

    if func.is_real_function() {
        for r in 0..func.register_count {
            let type_id = func.types[r as usize];
            if !linkage.type_info(type_id).is_defined() {
                return Err(TacError::UninferredRegister {
                    register: register_ref(func, r),
                });
            }
        }
    }

    log::trace!(
        "inferred {} registers for {}",
        func.register_count,
        func.link_name.as_deref().unwrap_or("<type-only module>")
    );
    Ok(())
}

fn register_ref(func: &FunctionIr, id: u32) -> RegisterRef {
    match func.register_name(id) {
        Some(name) => RegisterRef::Named(name.to_string()),
        None => RegisterRef::Anonymous(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tac_parser::parse_into;

    #[test]
    fn binds_register_type_from_bind() {
        let mut linkage = Linkage::new();
        let idx = parse_into(
            "(link-name \"id\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) (return 0)",
            &mut linkage,
        )
        .unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        assert_eq!(linkage.type_info(func.types[0]).prim, tac_ir::Primitive::S32);
    }

    #[test]
    fn unbound_register_is_an_inference_error() {
        let mut linkage = Linkage::new();
        let idx = parse_into(
            "(link-name \"f\") (parameter-count 1) (type-prim I32 s32) (return 0)",
            &mut linkage,
        )
        .unwrap();
        let mut func = linkage.functions()[idx].clone();
        let err = infer(&mut func, &mut linkage);
        assert!(matches!(err, Err(TacError::UninferredRegister { .. })));
    }

    #[test]
    fn redefining_a_type_through_two_type_prim_ops_is_an_error() {
        let mut linkage = Linkage::new();
        let idx = parse_into(
            "(type-prim T u8) (type-prim T u8)",
            &mut linkage,
        )
        .unwrap();
        let mut func = linkage.functions()[idx].clone();
        let err = infer(&mut func, &mut linkage);
        assert!(matches!(err, Err(TacError::TypeRedefined { .. })));
    }

    /// Build a function chaining `count` scalar adds over a single s32
    /// register, e.g. `r1 = r0 + r0; r2 = r1 + r0; ...`, returning `r_count`.
    fn chained_add_source(count: u32) -> String {
        let mut src = String::from("(link-name \"f\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) ");
        for r in 1..=count {
            src.push_str(&format!("(bind {r} I32) (add {r} {prev} 0) ", prev = r - 1));
        }
        src.push_str(&format!("(return {count})"));
        src
    }

    proptest! {
        // P1: every defined register of a real function has a non-`unknown`
        // type once `infer` succeeds.
        #[test]
        fn every_register_gets_a_defined_type(count in 1u32..12) {
            let mut linkage = Linkage::new();
            let idx = parse_into(&chained_add_source(count), &mut linkage).unwrap();
            let mut func = linkage.functions()[idx].clone();
            infer(&mut func, &mut linkage).unwrap();

            for r in 0..func.register_count {
                prop_assert!(linkage.type_info(func.types[r as usize]).is_defined());
            }
        }

        // P2: every type id a register carries indexes within
        // `linkage.type_defs`.
        #[test]
        fn every_register_type_id_is_in_range(count in 1u32..12) {
            let mut linkage = Linkage::new();
            let idx = parse_into(&chained_add_source(count), &mut linkage).unwrap();
            let mut func = linkage.functions()[idx].clone();
            infer(&mut func, &mut linkage).unwrap();

            for r in 0..func.register_count {
                prop_assert!((func.types[r as usize] as usize) < linkage.type_defs.len());
            }
        }
    }
}
