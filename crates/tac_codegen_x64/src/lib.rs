//! x86-64 lowering (§4.5): a naive single-pass register assignment plus
//! NASM-flavored text emission, targeting SysV or Windows calling
//! conventions.
//!
//! Register assignment is intentionally not an allocator: the first 13
//! virtual registers of a function map one-to-one onto a fixed physical
//! set (`rax rcx rdx rbx rsi rdi r8 r9 r10 r11 r12 r13 r14`); everything
//! past that spills to the frame. `r15` is never assigned to a virtual
//! register — it is reserved scratch for the two-memory-operand fixup
//! and for breaking cycles in parameter/argument shuffles.

use std::fmt::Write as _;

use tac_common::{TacError, TacResult};
use tac_ir::{ConstValue, FunctionIr, Instruction, Linkage, Opcode, Operand, Primitive, TypeId, TypePayload};

/// The 13 physical general-purpose registers available to the allocator,
/// in virtual-register assignment order (§4.5).
const PHYS64: [&str; 13] = [
    "rax", "rcx", "rdx", "rbx", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14",
];
const PHYS8: [&str; 13] = [
    "al", "cl", "dl", "bl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b", "r13b", "r14b",
];
/// Indices into `PHYS64` that the SysV/Windows ABI requires a callee to
/// preserve; `r15` is always saved separately since it is our scratch.
const CALLEE_SAVED: [usize; 6] = [3, 4, 5, 10, 11, 12];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Linux,
    Windows,
}

impl Target {
    pub fn native() -> Target {
        if cfg!(windows) {
            Target::Windows
        } else {
            Target::Linux
        }
    }

    fn arg_registers(self) -> &'static [&'static str] {
        match self {
            Target::Linux => &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
            Target::Windows => &["rcx", "rdx", "r8", "r9"],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Reg(usize),
    Spill(u32),
}

/// Emit a full NASM-flavored assembly listing for every real function in
/// `linkage` (§3.7, §5).
pub fn emit_x64(linkage: &Linkage, target: Target) -> TacResult<String> {
    if let Some(name) = linkage.unresolved_forward_refs().into_iter().next() {
        return Err(TacError::UnresolvedForwardRef { name });
    }

    let mut out = String::new();
    writeln!(out, "bits 64").unwrap();
    writeln!(out, "default rel").unwrap();
    writeln!(out, "section .text").unwrap();
    for func in linkage.real_functions() {
        writeln!(out, "global {}", func.link_name.as_deref().unwrap()).unwrap();
    }
    out.push('\n');

    for func in linkage.real_functions() {
        emit_function(&mut out, linkage, func, target)?;
        out.push('\n');
    }

    log::debug!("emitted x64 for {} function(s)", linkage.real_functions().count());
    Ok(out)
}

fn align_up(value: u32, align: u32) -> u32 {
    let align = align.max(1);
    (value + align - 1) / align * align
}

fn type_size(linkage: &Linkage, type_id: TypeId) -> u32 {
    let info = linkage.type_info(type_id);
    match &info.payload {
        TypePayload::Array { element_type_id, fixed_count } => type_size(linkage, *element_type_id) * (*fixed_count as u32),
        TypePayload::Record { field_start, field_count } => (0..*field_count)
            .map(|i| type_size(linkage, linkage.fields[(field_start + i) as usize].type_id))
            .sum(),
        _ => info.prim.size(),
    }
}

/// Assign every register in `func` a [`Location`], and return the spill
/// frame size in bytes (§4.5: "spill frame ... rounded to 16 bytes plus a
/// 16-byte pad").
fn assign_locations(linkage: &Linkage, func: &FunctionIr) -> (Vec<Location>, u32) {
    let mut locations = Vec::with_capacity(func.register_count as usize);
    let mut spill_offset = 0u32;
    for v in 0..func.register_count {
        if (v as usize) < PHYS64.len() {
            locations.push(Location::Reg(v as usize));
        } else {
            let size = type_size(linkage, func.types[v as usize]).max(1);
            let align = size.min(8);
            spill_offset = align_up(spill_offset, align) + size;
            locations.push(Location::Spill(spill_offset));
        }
    }
    let frame_size = align_up(spill_offset, 16) + 16;
    (locations, frame_size)
}

fn loc_text(loc: &Location) -> String {
    match loc {
        Location::Reg(idx) => PHYS64[*idx].to_string(),
        Location::Spill(offset) => format!("[rbp - {offset}]"),
    }
}

fn loc8_text(loc: &Location) -> String {
    match loc {
        Location::Reg(idx) => PHYS8[*idx].to_string(),
        Location::Spill(offset) => format!("byte [rbp - {offset}]"),
    }
}

fn is_mem(loc: &Location) -> bool {
    matches!(loc, Location::Spill(_))
}

struct FnCtx<'a> {
    linkage: &'a Linkage,
    func: &'a FunctionIr,
    locations: Vec<Location>,
    strings: Vec<String>,
    target: Target,
}

impl<'a> FnCtx<'a> {
    fn loc(&self, reg: u32) -> Location {
        self.locations[reg as usize]
    }

    /// Render a "read" operand (register-or-constant encoded word). A
    /// string constant is hoisted into `self.strings` and referenced by
    /// a `rel CONST<i>` label; every other constant renders as an
    /// immediate.
    fn operand(&mut self, word: u32) -> TacResult<String> {
        match Operand::decode(word) {
            Operand::Register(id) => Ok(loc_text(&self.loc(id))),
            Operand::Constant(idx) => {
                let constant = self.func.constants.get(idx).expect("interned constant must exist");
                match &constant.value {
                    ConstValue::Bool(b) => Ok((*b as i64).to_string()),
                    ConstValue::Int(i) => Ok(i.to_string()),
                    ConstValue::Float(f) => Ok(f.to_bits().to_string()),
                    ConstValue::Pointer(s) => {
                        let index = self.intern_string(s.clone());
                        Ok(format!("CONST{index}"))
                    }
                    ConstValue::Array(_) => {
                        // No `.rodata` allocation path for array constants exists in
                        // this backend (only string constants get one, via
                        // `intern_string`); rather than render a placeholder that
                        // would silently read back as zero, refuse to emit.
                        Err(TacError::UnsupportedOnTarget {
                            target: "x64".to_string(),
                            opcode: "constant".to_string(),
                            reason: "array-valued constants have no x64 storage representation".to_string(),
                        })
                    }
                }
            }
        }
    }

    fn intern_string(&mut self, s: String) -> usize {
        if let Some(i) = self.strings.iter().position(|existing| existing == &s) {
            return i;
        }
        self.strings.push(s);
        self.strings.len() - 1
    }

    fn operand_type(&self, word: u32) -> TypeId {
        match Operand::decode(word) {
            Operand::Register(id) => self.func.types[id as usize],
            Operand::Constant(idx) => self.func.constants.get(idx).expect("interned constant must exist").type_id,
        }
    }
}

fn emit_function(out: &mut String, linkage: &Linkage, func: &FunctionIr, target: Target) -> TacResult<()> {
    let name = func.link_name.as_deref().unwrap();
    let (locations, frame_size) = assign_locations(linkage, func);
    let used_callee_saved: Vec<&str> = CALLEE_SAVED
        .iter()
        .filter(|&&idx| (idx as u32) < func.register_count)
        .map(|&idx| PHYS64[idx])
        .collect();

    let mut ctx = FnCtx { linkage, func, locations, strings: Vec::new(), target };

    writeln!(out, "{name}:").unwrap();
    writeln!(out, "    push rbp").unwrap();
    writeln!(out, "    mov rbp, rsp").unwrap();
    writeln!(out, "    sub rsp, {frame_size}").unwrap();
    writeln!(out, "    push r15").unwrap();
    for reg in &used_callee_saved {
        writeln!(out, "    push {reg}").unwrap();
    }

    emit_parameter_shuffle(out, &mut ctx);

    let mut index = 0;
    while index < func.instructions.len() {
        emit_instruction(out, &mut ctx, index, &used_callee_saved)?;
        index += 1;
    }

    // A function whose body falls through without an explicit `return`
    // (e.g. one that only ever `jump`s) still needs a well-formed exit;
    // §4.1 validation guarantees the last instruction is `jump`/`return`,
    // so this is reachable only via a backward jump loop and never hit.
    emit_epilogue(out, &used_callee_saved);

    if !ctx.strings.is_empty() {
        writeln!(out, "section .rodata").unwrap();
        for (i, s) in ctx.strings.iter().enumerate() {
            writeln!(out, "CONST{i}: db `{}`, 0", escape_nasm_string(s)).unwrap();
        }
        writeln!(out, "section .text").unwrap();
    }
    Ok(())
}

fn escape_nasm_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('`', "\\`")
}

fn emit_epilogue(out: &mut String, used_callee_saved: &[&str]) {
    for reg in used_callee_saved.iter().rev() {
        writeln!(out, "    pop {reg}").unwrap();
    }
    writeln!(out, "    pop r15").unwrap();
    writeln!(out, "    leave").unwrap();
    writeln!(out, "    ret").unwrap();
}

/// Move incoming arguments from their ABI registers/stack slots into
/// each parameter's assigned [`Location`], resolving cycles (e.g. param 0
/// assigned `rsi` while param 1 arrives in `rsi`) through `r15` (§4.5).
fn emit_parameter_shuffle(out: &mut String, ctx: &mut FnCtx) {
    let abi_regs = ctx.target.arg_registers();
    let register_moves: Vec<(usize, Location)> = (0..ctx.func.parameter_count as usize)
        .filter(|&i| i < abi_regs.len())
        .filter_map(|i| {
            let src_idx = PHYS64.iter().position(|&r| r == abi_regs[i])?;
            Some((src_idx, ctx.loc(i as u32)))
        })
        .collect();
    emit_register_shuffle(out, &register_moves);

    for i in abi_regs.len()..ctx.func.parameter_count as usize {
        let stack_offset = 16 + (i - abi_regs.len()) as u32 * 8;
        writeln!(out, "    mov rax, [rbp + {stack_offset}]").unwrap();
        writeln!(out, "    mov {}, rax", loc_text(&ctx.loc(i as u32))).unwrap();
    }
}

/// Sequentialize a parallel register-to-location copy, breaking any
/// cycle through `r15` (standard parallel-move resolution).
fn emit_register_shuffle(out: &mut String, moves: &[(usize, Location)]) {
    let mut remaining: Vec<(Option<usize>, Location)> = moves.iter().map(|(s, d)| (Some(*s), *d)).collect();
    let mut done = vec![false; remaining.len()];
    loop {
        if done.iter().all(|d| *d) {
            break;
        }
        let mut progressed = false;
        for i in 0..remaining.len() {
            if done[i] {
                continue;
            }
            let (src, dest) = remaining[i];
            let dest_reg = match dest {
                Location::Reg(idx) => Some(idx),
                Location::Spill(_) => None,
            };
            let still_needed_as_source = dest_reg.is_some_and(|d| {
                remaining.iter().enumerate().any(|(j, (s, _))| !done[j] && j != i && *s == Some(d))
            });
            if still_needed_as_source {
                continue;
            }
            let src_text = match src {
                Some(idx) => PHYS64[idx].to_string(),
                None => "r15".to_string(),
            };
            writeln!(out, "    mov {}, {src_text}", loc_text(&dest)).unwrap();
            done[i] = true;
            progressed = true;
        }
        if progressed {
            continue;
        }
        // Every remaining move's destination is some other remaining move's
        // source: a pure cycle. Break it by routing the first one through
        // the scratch register.
        let i = done.iter().position(|d| !d).unwrap();
        let (src, _) = remaining[i];
        writeln!(out, "    mov r15, {}", PHYS64[src.expect("cycle participant must be register-sourced")]).unwrap();
        remaining[i].0 = None;
    }
}

fn emit_instruction(out: &mut String, ctx: &mut FnCtx, index: usize, used_callee_saved: &[&str]) -> TacResult<()> {
    let instr = ctx.func.instructions[index].clone();
    match &instr {
        Instruction::Two { op, dest, src, .. } => emit_two(out, ctx, *op, *dest, *src)?,
        Instruction::Three { op, dest, lhs, rhs, .. } if op.is_comparison() => {
            emit_comparison(out, ctx, index, *op, *dest, *lhs, *rhs)?;
        }
        Instruction::Three { op, dest, lhs, rhs, .. } => emit_three(out, ctx, *op, *dest, *lhs, *rhs)?,
        Instruction::Field { r, st, field, .. } => emit_fgetp(out, ctx, *r, *st, *field)?,
        Instruction::Call { op, dest, callee, arg_count, .. } => emit_call(out, ctx, *op, *dest, *callee, *arg_count, index)?,
        Instruction::Arg { .. } => {}
        Instruction::Jump { to, .. } => {
            writeln!(out, "    jmp {}", label_name(*to)).unwrap();
        }
        Instruction::Branch { op, cond, to, .. } => {
            if consumes_fused_compare(ctx.func, index, *cond) {
                // The preceding compare already emitted `cmp`; this branch
                // only needs the directional jump.
                let cc = fused_condition_code(ctx.func, index).expect("fused branch must follow a comparison");
                let cc = if matches!(op, Opcode::BranchNot) { invert_cc(cc) } else { cc };
                writeln!(out, "    j{cc} {}", label_name(*to)).unwrap();
            } else {
                let cond_text = ctx.operand(*cond)?;
                writeln!(out, "    cmp {cond_text}, 0").unwrap();
                let jcc = if matches!(op, Opcode::BranchNot) { "je" } else { "jne" };
                writeln!(out, "    {jcc} {}", label_name(*to)).unwrap();
            }
        }
        Instruction::Return { value, .. } => {
            if let Some(word) = value {
                let text = ctx.operand(*word)?;
                if text != "rax" {
                    writeln!(out, "    mov rax, {text}").unwrap();
                }
            }
            emit_epilogue(out, used_callee_saved);
        }
        Instruction::Label { id, .. } => {
            writeln!(out, "{}:", label_name(*id)).unwrap();
        }
        Instruction::TypePrim { .. }
        | Instruction::TypePointer { .. }
        | Instruction::TypeArray { .. }
        | Instruction::TypeRecord { .. }
        | Instruction::TypeBind { .. } => {}
    }
    Ok(())
}

fn label_name(id: u32) -> String {
    format!("._label_{id}")
}

fn emit_two(out: &mut String, ctx: &mut FnCtx, op: Opcode, dest: u32, src: u32) -> TacResult<()> {
    let src_text = ctx.operand(src)?;
    let dest_loc = ctx.loc(dest);
    match op {
        Opcode::Move => fixup_mov(out, &dest_loc, &src_text),
        Opcode::Cast => fixup_mov(out, &dest_loc, &src_text),
        Opcode::BNot => {
            fixup_mov(out, &dest_loc, &src_text);
            writeln!(out, "    not {}", loc_text(&dest_loc)).unwrap();
        }
        Opcode::Load => {
            writeln!(out, "    mov r15, {src_text}").unwrap();
            writeln!(out, "    mov r15, [r15]").unwrap();
            writeln!(out, "    mov {}, r15", loc_text(&dest_loc)).unwrap();
        }
        Opcode::Store => {
            let dest_text = loc_text(&dest_loc);
            writeln!(out, "    mov r15, {dest_text}").unwrap();
            writeln!(out, "    mov r14, {src_text}").unwrap();
            writeln!(out, "    mov [r15], r14").unwrap();
        }
        Opcode::Address => {
            writeln!(out, "    lea r15, {src_text}").unwrap();
            writeln!(out, "    mov {}, r15", loc_text(&dest_loc)).unwrap();
        }
        other => unreachable!("non-`two` opcode {other:?} reached emit_two"),
    }
    Ok(())
}

/// `mov dest, src` where both operands might be memory: route through
/// `r15` when they are (§4.5 two-memory-operand fixup).
fn fixup_mov(out: &mut String, dest: &Location, src_text: &str) {
    if is_mem(dest) && src_text.starts_with('[') {
        writeln!(out, "    mov r15, {src_text}").unwrap();
        writeln!(out, "    mov {}, r15", loc_text(dest)).unwrap();
    } else {
        writeln!(out, "    mov {}, {src_text}", loc_text(dest)).unwrap();
    }
}

fn emit_three(out: &mut String, ctx: &mut FnCtx, op: Opcode, dest: u32, lhs: u32, rhs: u32) -> TacResult<()> {
    if matches!(
        op,
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Shl | Opcode::Shr
    ) {
        reject_float_operand(ctx, op, lhs)?;
    }
    match op {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Band | Opcode::Bor | Opcode::Bxor => {
            emit_dest_src_binop(out, ctx, asm_mnemonic(op), dest, lhs, rhs)?;
        }
        Opcode::Div => {
            // Naive signed division through rax:rdx, result moved to dest.
            let lhs_text = ctx.operand(lhs)?;
            let rhs_text = ctx.operand(rhs)?;
            writeln!(out, "    mov rax, {lhs_text}").unwrap();
            writeln!(out, "    cqo").unwrap();
            writeln!(out, "    mov r15, {rhs_text}").unwrap();
            writeln!(out, "    idiv r15").unwrap();
            writeln!(out, "    mov {}, rax", loc_text(&ctx.loc(dest))).unwrap();
        }
        Opcode::Shl | Opcode::Shr => {
            let lhs_text = ctx.operand(lhs)?;
            let rhs_text = ctx.operand(rhs)?;
            let dest_loc = ctx.loc(dest);
            let mnemonic = if op == Opcode::Shl { "shl" } else { "sar" };
            if matches!(dest_loc, Location::Reg(1)) {
                // dest is rcx itself, which the shift count also needs:
                // accumulate through r15 and land the result in rcx last.
                writeln!(out, "    mov r15, {lhs_text}").unwrap();
                writeln!(out, "    mov rcx, {rhs_text}").unwrap();
                writeln!(out, "    {mnemonic} r15, cl").unwrap();
                writeln!(out, "    mov rcx, r15").unwrap();
            } else {
                fixup_mov(out, &dest_loc, &lhs_text);
                writeln!(out, "    mov rcx, {rhs_text}").unwrap();
                writeln!(out, "    {mnemonic} {}, cl", loc_text(&dest_loc)).unwrap();
            }
        }
        Opcode::PointerAdd | Opcode::PointerSubtract => {
            let mnemonic = if op == Opcode::PointerAdd { "add" } else { "sub" };
            emit_dest_src_binop(out, ctx, mnemonic, dest, lhs, rhs)?;
        }
        Opcode::AGetP => emit_getp(out, ctx, dest, lhs, rhs, false)?,
        Opcode::APGetP => emit_getp(out, ctx, dest, lhs, rhs, true)?,
        other => unreachable!("non-`three` opcode {other:?} reached emit_three (comparisons are handled separately)"),
    }
    Ok(())
}

/// This naive 13-GPR allocator has no XMM register file or float calling
/// convention; lowering a float-typed arithmetic op straight through the
/// integer mnemonics would silently produce wrong bit-pattern math
/// (spec §9: "should either reject FP explicitly or ... do not silently
/// miscompile").
fn reject_float_operand(ctx: &FnCtx, op: Opcode, operand_word: u32) -> TacResult<()> {
    let type_id = ctx.operand_type(operand_word);
    if ctx.linkage.type_info(type_id).prim.is_float() {
        return Err(TacError::UnsupportedOnTarget {
            target: "x64".to_string(),
            opcode: op.name().to_string(),
            reason: "floating-point arithmetic requires XMM register allocation, which this backend does not implement".to_string(),
        });
    }
    Ok(())
}

fn asm_mnemonic(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "add",
        Opcode::Sub => "sub",
        Opcode::Mul => "imul",
        Opcode::Band => "and",
        Opcode::Bor => "or",
        Opcode::Bxor => "xor",
        other => unreachable!("{other:?} has no direct dest/src mnemonic"),
    }
}

/// `dest = dest <mnemonic> src`, first copying `lhs` into `dest` if it
/// isn't already there; routes through `r15` if both `dest` and the
/// operand would otherwise be memory (§4.5).
fn emit_dest_src_binop(out: &mut String, ctx: &mut FnCtx, mnemonic: &str, dest: u32, lhs: u32, rhs: u32) -> TacResult<()> {
    let lhs_text = ctx.operand(lhs)?;
    let rhs_text = ctx.operand(rhs)?;
    let dest_loc = ctx.loc(dest);
    fixup_mov(out, &dest_loc, &lhs_text);
    if is_mem(&dest_loc) && rhs_text.starts_with('[') {
        writeln!(out, "    mov r15, {rhs_text}").unwrap();
        writeln!(out, "    {mnemonic} {}, r15", loc_text(&dest_loc)).unwrap();
    } else {
        writeln!(out, "    {mnemonic} {}, {rhs_text}", loc_text(&dest_loc)).unwrap();
    }
    Ok(())
}

/// True when the comparison writing `cond` is immediately followed by the
/// single branch consuming it, and that register has no other reader —
/// the fusable shape (§4.5: "single cmp + directional jCC").
fn consumes_fused_compare(func: &FunctionIr, branch_index: usize, cond: u32) -> bool {
    if branch_index == 0 {
        return false;
    }
    matches!(
        &func.instructions[branch_index - 1],
        Instruction::Three { op, dest, .. } if op.is_comparison() && *dest == cond
    )
}

fn fused_condition_code(func: &FunctionIr, branch_index: usize) -> Option<&'static str> {
    match &func.instructions[branch_index - 1] {
        Instruction::Three { op, .. } => Some(match op {
            Opcode::Gt => "g",
            Opcode::Lt => "l",
            Opcode::Eq => "e",
            Opcode::Neq => "ne",
            Opcode::Gte => "ge",
            Opcode::Lte => "le",
            _ => return None,
        }),
        _ => None,
    }
}

fn invert_cc(cc: &'static str) -> &'static str {
    match cc {
        "g" => "le",
        "l" => "ge",
        "e" => "ne",
        "ne" => "e",
        "ge" => "l",
        "le" => "g",
        other => other,
    }
}

/// Comparisons whose result feeds the very next branch skip the
/// `setcc`/`movzx` pair entirely; the branch emits `cmp` + `jCC` and this
/// instruction emits nothing (§4.5).
fn emit_comparison(out: &mut String, ctx: &mut FnCtx, index: usize, op: Opcode, dest: u32, lhs: u32, rhs: u32) -> TacResult<()> {
    let lhs_type = ctx.operand_type(lhs);
    if matches!(ctx.linkage.type_info(lhs_type).prim, Primitive::Array) {
        return Err(TacError::UnsupportedOnTarget {
            target: "x64".to_string(),
            opcode: op.name().to_string(),
            reason: "array-wide comparisons must be scalarized or lowered to memcmp before x64 emission".to_string(),
        });
    }
    reject_float_operand(ctx, op, lhs)?;

    let lhs_text = ctx.operand(lhs)?;
    let rhs_text = ctx.operand(rhs)?;
    if is_mem_text(&lhs_text) && is_mem_text(&rhs_text) {
        writeln!(out, "    mov r15, {lhs_text}").unwrap();
        writeln!(out, "    cmp r15, {rhs_text}").unwrap();
    } else {
        writeln!(out, "    cmp {lhs_text}, {rhs_text}").unwrap();
    }

    let consumed_by_next_branch = matches!(
        ctx.func.instructions.get(index + 1),
        Some(Instruction::Branch { cond, .. }) if *cond == dest
    );
    if consumed_by_next_branch {
        return Ok(());
    }

    let cc = match op {
        Opcode::Gt => "g",
        Opcode::Lt => "l",
        Opcode::Eq => "e",
        Opcode::Neq => "ne",
        Opcode::Gte => "ge",
        Opcode::Lte => "le",
        other => unreachable!("{other:?} is not a comparison opcode"),
    };
    let dest_loc = ctx.loc(dest);
    writeln!(out, "    set{cc} {}", loc8_text(&dest_loc)).unwrap();
    if is_mem(&dest_loc) {
        writeln!(out, "    movzx r15, {}", loc8_text(&dest_loc)).unwrap();
        writeln!(out, "    mov {}, r15", loc_text(&dest_loc)).unwrap();
    } else {
        writeln!(out, "    movzx {}, {}", loc_text(&dest_loc), loc8_text(&dest_loc)).unwrap();
    }
    Ok(())
}

fn is_mem_text(text: &str) -> bool {
    text.starts_with('[')
}

fn emit_getp(out: &mut String, ctx: &mut FnCtx, dest: u32, lhs: u32, rhs: u32, via_pointer: bool) -> TacResult<()> {
    let element_size = {
        let base_type = ctx.operand_type(lhs);
        let array_type = if via_pointer {
            match &ctx.linkage.type_info(base_type).payload {
                TypePayload::Pointer { target_type_id } => *target_type_id,
                _ => unreachable!("apgetp base must be a pointer"),
            }
        } else {
            base_type
        };
        match &ctx.linkage.type_info(array_type).payload {
            TypePayload::Array { element_type_id, .. } => type_size(ctx.linkage, *element_type_id),
            _ => unreachable!("agetp/apgetp base must resolve to an array"),
        }
    };

    let lhs_text = ctx.operand(lhs)?;
    let idx_text = ctx.operand(rhs)?;
    if via_pointer {
        writeln!(out, "    mov r15, {lhs_text}").unwrap();
    } else {
        writeln!(out, "    lea r15, {lhs_text}").unwrap();
    }
    writeln!(out, "    mov r14, {idx_text}").unwrap();
    writeln!(out, "    imul r14, {element_size}").unwrap();
    writeln!(out, "    add r15, r14").unwrap();
    writeln!(out, "    mov {}, r15", loc_text(&ctx.loc(dest))).unwrap();
    Ok(())
}

fn emit_fgetp(out: &mut String, ctx: &mut FnCtx, r: u32, st: u32, field: u32) -> TacResult<()> {
    let st_type = ctx.operand_type(st);
    let field_start = match &ctx.linkage.type_info(st_type).payload {
        TypePayload::Record { field_start, .. } => *field_start,
        _ => unreachable!("fgetp base must be a struct/union"),
    };
    let offset: u32 = (0..field).map(|i| type_size(ctx.linkage, ctx.linkage.fields[(field_start + i) as usize].type_id)).sum();

    let base_text = ctx.operand(st)?;
    writeln!(out, "    lea r15, {base_text}").unwrap();
    if offset > 0 {
        writeln!(out, "    add r15, {offset}").unwrap();
    }
    writeln!(out, "    mov {}, r15", loc_text(&ctx.loc(r))).unwrap();
    Ok(())
}

fn emit_call(
    out: &mut String,
    ctx: &mut FnCtx,
    op: Opcode,
    dest: Option<u32>,
    callee: u32,
    arg_count: u32,
    call_index: usize,
) -> TacResult<()> {
    let args = ctx.func.call_arguments(call_index, arg_count);
    let abi_regs = ctx.target.arg_registers();
    let register_arg_count = (arg_count as usize).min(abi_regs.len());

    let arg_texts: Vec<String> = args.iter().map(|&word| ctx.operand(word)).collect::<TacResult<_>>()?;
    // Resolve the callee before any argument register is overwritten: if it
    // lives in one of the registers we're about to clobber, stash it in the
    // scratch register first.
    let callee_text = ctx.operand(callee)?;
    let callee_text = if abi_regs.iter().take(register_arg_count).any(|&r| r == callee_text) {
        writeln!(out, "    mov r15, {callee_text}").unwrap();
        "r15".to_string()
    } else {
        callee_text
    };

    for (i, reg) in abi_regs.iter().take(register_arg_count).enumerate() {
        writeln!(out, "    push {reg}").unwrap();
        writeln!(out, "    mov {reg}, {}", arg_texts[i]).unwrap();
    }
    for i in (register_arg_count..args.len()).rev() {
        writeln!(out, "    push {}", arg_texts[i]).unwrap();
    }

    if op == Opcode::Syscall {
        writeln!(out, "    mov rax, {callee_text}").unwrap();
        writeln!(out, "    syscall").unwrap();
    } else {
        writeln!(out, "    call {callee_text}").unwrap();
    }

    if let Some(d) = dest {
        writeln!(out, "    mov {}, rax", loc_text(&ctx.loc(d))).unwrap();
    }

    let stack_arg_count = args.len().saturating_sub(register_arg_count);
    if stack_arg_count > 0 {
        writeln!(out, "    add rsp, {}", stack_arg_count * 8).unwrap();
    }
    for reg in abi_regs.iter().take(register_arg_count).rev() {
        writeln!(out, "    pop {reg}").unwrap();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tac_parser::parse_into;
    use tac_typeck::{check, infer};

    fn emitted(source: &str) -> String {
        let mut linkage = Linkage::new();
        let idx = parse_into(source, &mut linkage).unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        check(&mut func, &linkage).unwrap();
        *linkage.functions_mut().get_mut(idx).unwrap() = func;
        emit_x64(&linkage, Target::Linux).unwrap()
    }

    fn emitted_result(source: &str) -> TacResult<String> {
        let mut linkage = Linkage::new();
        let idx = parse_into(source, &mut linkage).unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        check(&mut func, &linkage).unwrap();
        *linkage.functions_mut().get_mut(idx).unwrap() = func;
        emit_x64(&linkage, Target::Linux)
    }

    #[test]
    fn identity_function_has_prologue_and_epilogue() {
        let text = emitted("(link-name \"id\") (parameter-count 1) (type-prim I32 s32) (bind 0 I32) (return 0)");
        assert!(text.contains("id:"));
        assert!(text.contains("push rbp"));
        assert!(text.contains("mov rbp, rsp"));
        assert!(text.contains("leave"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn compare_immediately_before_branch_fuses_into_a_single_jump() {
        let text = emitted(
            "(link-name \"f\") (parameter-count 2) (type-prim I32 s32) (type-prim Bool boolean) \
             (bind 0 I32) (bind 1 I32) (bind c Bool) \
             (gt c 0 1) (branch c :target) (label :target) (return 0)",
        );
        assert!(text.contains("cmp"));
        assert!(text.contains("jg ._label_"));
        assert!(!text.contains("setg"), "a fused compare must not also emit setcc");
    }

    #[test]
    fn unfused_comparison_emits_setcc_and_movzx() {
        let text = emitted(
            "(link-name \"f\") (parameter-count 2) (type-prim I32 s32) (type-prim Bool boolean) \
             (bind 0 I32) (bind 1 I32) (bind c Bool) \
             (gt c 0 1) (return)",
        );
        assert!(text.contains("setg"));
        assert!(text.contains("movzx"));
    }

    #[test]
    fn frame_size_is_always_16_byte_aligned() {
        // P8: regardless of how many locals spill to the stack, `sub rsp, K`
        // must satisfy K % 16 == 0. Vary the register count by binding an
        // increasing number of same-typed locals.
        for count in 1..=9u32 {
            let mut binds = String::new();
            for r in 0..count {
                binds.push_str(&format!("(bind {r} I32) "));
            }
            let source = format!(
                "(link-name \"f\") (parameter-count {count}) (type-prim I32 s32) {binds}(return 0)"
            );
            let text = emitted(&source);
            let line = text.lines().find(|l| l.trim_start().starts_with("sub rsp,")).expect("prologue must reserve stack space");
            let amount: u32 = line.trim_start().trim_start_matches("sub rsp,").trim().parse().unwrap();
            assert_eq!(amount % 16, 0, "frame size {amount} for {count} registers is not 16-byte aligned");
        }
    }

    #[test]
    fn unresolved_forward_reference_is_rejected_before_lowering() {
        let mut linkage = Linkage::new();
        let idx = parse_into("(type-pointer NodePtr Ghost)", &mut linkage).unwrap();
        let mut func = linkage.functions()[idx].clone();
        infer(&mut func, &mut linkage).unwrap();
        *linkage.functions_mut().get_mut(idx).unwrap() = func;

        let err = emit_x64(&linkage, Target::Linux).unwrap_err();
        assert!(matches!(err, TacError::UnresolvedForwardRef { name } if name == "Ghost"));
    }

    #[test]
    fn float_arithmetic_is_rejected_rather_than_miscompiled() {
        // `add` type-checks for F32 operands (only bitwise/shift ops are
        // integer-only, per tac_typeck), so this reaches x64 lowering, which
        // has no XMM allocation story and must refuse rather than emit `add`
        // on the raw bit pattern.
        let text = emitted_result(
            "(link-name \"f\") (parameter-count 2) (type-prim F32 f32) \
             (bind 0 F32) (bind 1 F32) (add 0 0 1) (return 0)",
        );
        assert!(matches!(text, Err(TacError::UnsupportedOnTarget { opcode, .. }) if opcode == "add"));
    }

    #[test]
    fn float_comparison_is_also_rejected() {
        let text = emitted_result(
            "(link-name \"f\") (parameter-count 2) (type-prim F32 f32) (type-prim Bool boolean) \
             (bind 0 F32) (bind 1 F32) (bind c Bool) (gt c 0 1) (return)",
        );
        assert!(matches!(text, Err(TacError::UnsupportedOnTarget { opcode, .. }) if opcode == "gt"));
    }

    #[test]
    fn array_valued_constant_is_rejected_rather_than_rendered_as_zero() {
        // No `.rodata` allocation path exists for array constants on this
        // backend; silently rendering one as the literal `0` would emit
        // code that reads back garbage with no diagnostic.
        let text = emitted_result(
            "(link-name \"f\") (parameter-count 0) (type-prim I32 s32) (type-array A3 I32 3) \
             (bind 0 A3) (move 0 (A3 (1 2 3))) (return)",
        );
        assert!(matches!(text, Err(TacError::UnsupportedOnTarget { opcode, .. }) if opcode == "constant"));
    }

    #[test]
    fn six_argument_call_saves_and_restores_argument_registers() {
        // Mirrors tac_parser's own `six_argument_call_overflows_into_arg_records`
        // fixture; x64 emission doesn't need inference to exercise the
        // call-argument save/restore sequence.
        let mut linkage = Linkage::new();
        let idx = parse_into(
            "(link-name \"f\") (parameter-count 0) \
             (call :sysv r f a b c d e g) (return r)",
            &mut linkage,
        )
        .unwrap();
        let text = emit_x64(&linkage, Target::Linux).unwrap();
        let _ = idx;
        for reg in ["rdi", "rsi", "rdx", "rcx", "r8", "r9"] {
            assert!(text.contains(&format!("push {reg}")));
            assert!(text.contains(&format!("pop {reg}")));
        }
    }
}
