//! Per-function IR (§3.6).

use crate::constant::ConstantPool;
use crate::ids::{LabelId, TypeId};
use crate::instruction::Instruction;
use crate::opcode::CallingConvention;
use hashbrown::HashMap;

/// Where a label id currently points. A label may be forward-referenced by
/// jump/branch before its defining `label` instruction is seen; `Unbound`
/// remembers the surface name for diagnostics until it's bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelBinding {
    Unbound,
    Bound(usize),
}

/// Label id allocation and binding, per function (§3.1, §3.4).
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    names_to_ids: HashMap<String, LabelId>,
    bindings: Vec<LabelBinding>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a label name, minting a fresh unbound id on first mention.
    pub fn intern(&mut self, name: &str) -> LabelId {
        if let Some(&id) = self.names_to_ids.get(name) {
            return id;
        }
        let id = self.bindings.len() as LabelId;
        self.bindings.push(LabelBinding::Unbound);
        self.names_to_ids.insert(name.to_string(), id);
        id
    }

    /// Mint a label id with no surface name (used by the scalarization
    /// pass to generate fresh loop labels, §4.3).
    pub fn mint_anonymous(&mut self) -> LabelId {
        let id = self.bindings.len() as LabelId;
        self.bindings.push(LabelBinding::Unbound);
        id
    }

    pub fn bind(&mut self, id: LabelId, instruction_index: usize) {
        self.bindings[id as usize] = LabelBinding::Bound(instruction_index);
    }

    pub fn binding(&self, id: LabelId) -> Option<&LabelBinding> {
        self.bindings.get(id as usize)
    }

    pub fn is_bound(&self, id: LabelId) -> bool {
        matches!(self.binding(id), Some(LabelBinding::Bound(_)))
    }

    pub fn target_index(&self, id: LabelId) -> Option<usize> {
        match self.binding(id) {
            Some(LabelBinding::Bound(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn all_bound(&self) -> bool {
        self.bindings.iter().all(|b| matches!(b, LabelBinding::Bound(_)))
    }

    /// Shift every binding strictly after `threshold` by `delta` instruction
    /// slots. Used by scalarization when it splices a multi-instruction
    /// loop in over a single rewritten instruction (§4.3, §5: "all later
    /// labels are re-indexed consistently").
    pub fn shift_bindings_after(&mut self, threshold: usize, delta: usize) {
        for binding in &mut self.bindings {
            if let LabelBinding::Bound(idx) = binding {
                if *idx > threshold {
                    *idx += delta;
                }
            }
        }
    }
}

/// A single IR function, or a type-only module when `link_name` is `None`
/// (§3.6).
#[derive(Debug, Clone)]
pub struct FunctionIr {
    pub link_name: Option<String>,
    pub parameter_count: u32,
    pub calling_convention: CallingConvention,
    pub register_count: u32,
    /// Type id per register; index with the register id.
    pub types: Vec<TypeId>,
    pub constants: ConstantPool,
    pub instructions: Vec<Instruction>,
    pub labels: LabelTable,
    pub return_type: TypeId,
    pub has_return_type: bool,
    pub register_names: Vec<Option<String>>,
}

impl FunctionIr {
    pub fn new() -> Self {
        FunctionIr {
            link_name: None,
            parameter_count: 0,
            calling_convention: CallingConvention::default(),
            register_count: 0,
            types: Vec::new(),
            constants: ConstantPool::new(),
            instructions: Vec::new(),
            labels: LabelTable::new(),
            return_type: 0,
            has_return_type: false,
            register_names: Vec::new(),
        }
    }

    pub fn is_real_function(&self) -> bool {
        self.link_name.is_some()
    }

    pub fn is_type_only_module(&self) -> bool {
        self.link_name.is_none()
    }

    /// Widen `register_count`/`types`/`register_names` so register `id` is
    /// addressable (§4.1: "a non-negative integer widens register_count").
    pub fn ensure_register(&mut self, id: u32) {
        if id >= self.register_count {
            let new_count = id + 1;
            self.types.resize(new_count as usize, 0);
            self.register_names.resize(new_count as usize, None);
            self.register_count = new_count;
        }
    }

    pub fn set_register_name(&mut self, id: u32, name: &str) {
        self.ensure_register(id);
        self.register_names[id as usize] = Some(name.to_string());
    }

    pub fn register_name(&self, id: u32) -> Option<&str> {
        self.register_names.get(id as usize).and_then(|n| n.as_deref())
    }

    /// Read the up-to-three operands recorded by the `arg` pseudo-instruction
    /// at `arg_instruction_index` (§4.1 call/struct layout).
    pub fn arg_slot(&self, arg_instruction_index: usize) -> &[Option<u32>; 3] {
        match &self.instructions[arg_instruction_index] {
            Instruction::Arg { args, .. } => args,
            other => panic!("expected Arg pseudo-instruction, found {:?}", other.opcode()),
        }
    }

    /// Collect `count` raw values packed three-per-slot into `Arg`
    /// pseudo-instructions immediately following `after_index` (§4.1: call
    /// arguments and struct/union field-type lists share this overflow
    /// mechanism).
    pub fn trailing_args(&self, after_index: usize, count: u32) -> Vec<u32> {
        let mut out = Vec::with_capacity(count as usize);
        let mut slot_index = after_index + 1;
        while (out.len() as u32) < count {
            let slot = self.arg_slot(slot_index);
            for maybe in slot {
                if (out.len() as u32) >= count {
                    break;
                }
                if let Some(value) = maybe {
                    out.push(*value);
                }
            }
            slot_index += 1;
        }
        out
    }

    /// Collect the `arg_count` arguments following a `call`/`syscall` at
    /// `call_index`, reading the synthetic `arg` records immediately after
    /// it (§4.1).
    pub fn call_arguments(&self, call_index: usize, arg_count: u32) -> Vec<u32> {
        self.trailing_args(call_index, arg_count)
    }
}

impl Default for FunctionIr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_register_widens_count() {
        let mut f = FunctionIr::new();
        f.ensure_register(4);
        assert_eq!(f.register_count, 5);
        assert_eq!(f.types.len(), 5);
    }

    #[test]
    fn label_table_tracks_binding() {
        let mut labels = LabelTable::new();
        let id = labels.intern("loop_start");
        assert!(!labels.is_bound(id));
        labels.bind(id, 3);
        assert!(labels.is_bound(id));
        assert_eq!(labels.target_index(id), Some(3));
    }

    #[test]
    fn label_intern_is_idempotent() {
        let mut labels = LabelTable::new();
        let a = labels.intern("x");
        let b = labels.intern("x");
        assert_eq!(a, b);
        assert_eq!(labels.len(), 1);
    }
}
