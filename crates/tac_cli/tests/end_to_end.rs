//! End-to-end scenarios from spec.md §8, run straight through the
//! parse -> infer -> check -> (scalarize) -> lower pipeline the `tacc`
//! subcommands wire together.

use pretty_assertions::assert_eq;
use tac_common::TacError;
use tac_ir::{FunctionIr, Instruction, Linkage, Opcode};

fn parsed(source: &str) -> (FunctionIr, Linkage) {
    let mut linkage = Linkage::new();
    let idx = tac_parser::parse_into(source, &mut linkage).unwrap();
    let mut func = linkage.functions()[idx].clone();
    tac_typeck::infer(&mut func, &mut linkage).unwrap();
    tac_typeck::check(&mut func, &linkage).unwrap();
    *linkage.functions_mut().get_mut(idx).unwrap() = func;
    let func = linkage.functions()[idx].clone();
    (func, linkage)
}

#[test]
fn scenario_1_identity_int_function() {
    let (_, linkage) = parsed(
        "(link-name \"id\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) (return 0)",
    );
    let c = tac_codegen_c::emit_c(&linkage).unwrap();
    assert!(c.contains("typedef int32_t _t1;"));
    assert!(c.contains("_t1 id(_t1 _r0) {"));
}

#[test]
fn scenario_2_pointer_arithmetic() {
    // `(pointer-add d p (I32 1))` with p: pointer(s32) type-checks.
    let mut linkage = Linkage::new();
    let idx = tac_parser::parse_into(
        "(link-name \"f\") (parameter-count 1) (type-prim I32 s32) (type-pointer PI32 I32) \
         (bind 0 PI32) (bind d PI32) (pointer-add d 0 (I32 1)) (return)",
        &mut linkage,
    )
    .unwrap();
    let mut func = linkage.functions()[idx].clone();
    tac_typeck::infer(&mut func, &mut linkage).unwrap();
    assert!(tac_typeck::check(&mut func, &linkage).is_ok());

    // `(pointer-add d p p)` fails: rhs must be an integer, not another pointer.
    let mut linkage2 = Linkage::new();
    let idx2 = tac_parser::parse_into(
        "(link-name \"g\") (parameter-count 1) (type-prim I32 s32) (type-pointer PI32 I32) \
         (bind 0 PI32) (bind d PI32) (pointer-add d 0 0) (return)",
        &mut linkage2,
    )
    .unwrap();
    let mut func2 = linkage2.functions()[idx2].clone();
    tac_typeck::infer(&mut func2, &mut linkage2).unwrap();
    let err = tac_typeck::check(&mut func2, &linkage2).unwrap_err();
    match err {
        TacError::TypeMismatch { detail } => assert!(detail.contains("expected integer"), "{detail}"),
        other => panic!("expected a type mismatch, got {other:?}"),
    }
}

#[test]
fn scenario_3_redefined_type_fails() {
    let mut linkage = Linkage::new();
    let err = tac_parser::parse_into(
        "(link-name \"h\") (parameter-count 0) (type-prim T u8) (type-prim T u8) (return)",
        &mut linkage,
    )
    .unwrap_err();
    match err {
        TacError::TypeRedefined { name } => assert_eq!(name, "T"),
        other => panic!("expected TypeRedefined, got {other:?}"),
    }
}

#[test]
fn scenario_4_array_wise_add_scalarizes_into_one_clean_loop() {
    let (mut func, mut linkage) = parsed(
        "(link-name \"vec_add\") (parameter-count 3) \
         (type-prim I32 s32) (type-array A4 I32 4) \
         (bind 0 A4) (bind 1 A4) (bind 2 A4) \
         (add 0 1 2) (return)",
    );
    let rewritten = tac_scalarize::scalarize(&mut func, &mut linkage).unwrap();
    assert_eq!(rewritten, 1);
    tac_typeck::check(&mut func, &linkage).unwrap();

    let labels = func.instructions.iter().filter(|i| matches!(i, Instruction::Label { .. })).count();
    assert_eq!(labels, 2, "exactly loop_start and loop_end");
    let branches = func.instructions.iter().filter(|i| matches!(i, Instruction::Branch { .. })).count();
    assert_eq!(branches, 1);
    let element_adds = func
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Three { op: Opcode::Add, .. }))
        .count();
    assert_eq!(element_adds, 2, "one element add plus one index increment");
    let jumps = func.instructions.iter().filter(|i| matches!(i, Instruction::Jump { .. })).count();
    assert_eq!(jumps, 1);

    // Label, branch-on->=4, element op, increment, jump, end-label: in that order.
    let shapes: Vec<&'static str> = func
        .instructions
        .iter()
        .map(|i| match i {
            Instruction::Label { .. } => "label",
            Instruction::Branch { .. } => "branch",
            Instruction::Three { op: Opcode::Gte, .. } => "gte",
            Instruction::Three { op: Opcode::Add, .. } => "add",
            Instruction::Jump { .. } => "jump",
            _ => "other",
        })
        .collect();
    let loop_start = shapes.iter().position(|s| *s == "label").unwrap();
    assert_eq!(&shapes[loop_start..loop_start + 6], ["label", "gte", "branch", "add", "add", "jump"]);
}

#[test]
fn scenario_5_compare_branch_fusion_emits_only_cmp_and_jump() {
    let (_, linkage) = parsed(
        "(link-name \"f\") (parameter-count 2) (type-prim I32 s32) (type-prim Bool boolean) \
         (bind 0 I32) (bind 1 I32) (bind t Bool) \
         (lt t 0 1) (branch t :target) (label :target) (return 0)",
    );
    let text = tac_codegen_x64::emit_x64(&linkage, tac_codegen_x64::Target::Linux).unwrap();
    assert!(text.contains("cmp"));
    assert!(text.contains("jl ._label_"));
    assert!(!text.contains("setl"), "fused compare must not also emit setcc");
}

#[test]
fn scenario_6_six_argument_call_pushes_and_pops_in_order() {
    let mut linkage = Linkage::new();
    tac_parser::parse_into(
        "(link-name \"f\") (parameter-count 0) (call :sysv r f a b c d e g) (return r)",
        &mut linkage,
    )
    .unwrap();
    let text = tac_codegen_x64::emit_x64(&linkage, tac_codegen_x64::Target::Linux).unwrap();

    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let push_positions: Vec<usize> = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"]
        .iter()
        .map(|r| lines.iter().position(|l| *l == format!("push {r}")).unwrap())
        .collect();
    let pop_positions: Vec<usize> = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"]
        .iter()
        .map(|r| lines.iter().position(|l| *l == format!("pop {r}")).unwrap())
        .collect();
    let call_position = lines.iter().position(|l| l.starts_with("call")).unwrap();
    let mov_dest_position = lines[call_position + 1..]
        .iter()
        .position(|l| l.starts_with("mov ") && l.ends_with(", rax"))
        .map(|i| call_position + 1 + i)
        .expect("the call result must be moved out of rax after the call");

    // pushes happen in argument order, before the call.
    assert!(push_positions.windows(2).all(|w| w[0] < w[1]));
    assert!(*push_positions.last().unwrap() < call_position);
    // the destination is read out of rax before any argument register is restored.
    assert!(mov_dest_position > call_position);
    assert!(pop_positions.iter().all(|&p| p > mov_dest_position));
    // pops unwind in reverse argument order.
    assert!(pop_positions.windows(2).all(|w| w[0] > w[1]));
}
