//! The linkage context (§3.7): the shared container that holds type
//! definitions and the functions that will emit together.
//!
//! `FunctionIr` intentionally does **not** carry a back-reference to its
//! owning `Linkage` (the spec's `linkage: &Linkage` field, a weak
//! reference in the host-GC-rooted original). Rust's ownership model makes
//! that back-reference awkward for no benefit here: every pass that needs
//! both already has `&Linkage` in scope and threads it alongside
//! `&FunctionIr` explicitly. See DESIGN.md.

use crate::function::FunctionIr;
use crate::ids::TypeId;
use crate::types::{FieldSlot, TypeInfo};
use hashbrown::HashMap;
use tac_common::TacError;

#[derive(Debug, Default)]
pub struct Linkage {
    pub type_defs: Vec<TypeInfo>,
    pub type_names: Vec<Option<String>>,
    pub fields: Vec<FieldSlot>,
    name_to_type: HashMap<String, TypeId>,
    irs_by_name: HashMap<String, usize>,
    irs_ordered: Vec<FunctionIr>,
}

impl Linkage {
    pub fn new() -> Self {
        // Id 0 is the reserved unknown primitive (§3.1).
        Linkage {
            type_defs: vec![TypeInfo::unknown()],
            type_names: vec![None],
            fields: Vec::new(),
            name_to_type: HashMap::new(),
            irs_by_name: HashMap::new(),
            irs_ordered: Vec::new(),
        }
    }

    // --- type names ---------------------------------------------------

    /// Reference position (§4.1): the name must already have been
    /// mentioned, by a prior definition or forward reference.
    pub fn reference_type(&self, name: &str) -> Result<TypeId, TacError> {
        self.name_to_type
            .get(name)
            .copied()
            .ok_or_else(|| TacError::UnknownType { name: name.to_string() })
    }

    /// Forward-reference / definition position (§4.1): return the name's
    /// existing id, minting an `unknown`-typed placeholder on first
    /// mention. Whether the id is later concretely defined is tracked on
    /// `type_defs[id]` itself (`prim != unknown`), not here — both a
    /// forward ref and a not-yet-processed definition look identical at
    /// this point.
    pub fn forward_reference_type(&mut self, name: &str) -> TypeId {
        if let Some(&id) = self.name_to_type.get(name) {
            return id;
        }
        let id = self.type_defs.len() as TypeId;
        self.type_defs.push(TypeInfo::unknown());
        self.type_names.push(Some(name.to_string()));
        self.name_to_type.insert(name.to_string(), id);
        id
    }

    /// Definition by id (§3.3, §4.2): inference calls this once per
    /// type-forming instruction. A type id already concrete (`prim !=
    /// unknown`) cannot be redefined — this is the one place that
    /// invariant is enforced, regardless of whether `id` came from a
    /// forward reference or is being defined for the first time.
    pub fn define_type_by_id(&mut self, id: TypeId, info: TypeInfo) -> Result<(), TacError> {
        if self.type_defs[id as usize].is_defined() {
            let name = self.type_name(id).unwrap_or("<anonymous>").to_string();
            return Err(TacError::TypeRedefined { name });
        }
        self.type_defs[id as usize] = info;
        Ok(())
    }

    /// Intern an anonymous, already-concrete type definition produced by a
    /// pass (scalarization mints a fresh index type, §4.3) rather than by
    /// the surface parser.
    pub fn define_anonymous_type(&mut self, info: TypeInfo) -> TypeId {
        let id = self.type_defs.len() as TypeId;
        self.type_defs.push(info);
        self.type_names.push(None);
        id
    }

    pub fn type_info(&self, id: TypeId) -> &TypeInfo {
        &self.type_defs[id as usize]
    }

    pub fn type_name(&self, id: TypeId) -> Option<&str> {
        self.type_names.get(id as usize).and_then(|n| n.as_deref())
    }

    /// Human-readable type name for diagnostics: the surface name if one
    /// was given, else a structural rendering.
    pub fn describe_type(&self, id: TypeId) -> String {
        if let Some(name) = self.type_name(id) {
            return name.to_string();
        }
        let info = self.type_info(id);
        match &info.payload {
            crate::types::TypePayload::Pointer { target_type_id } => {
                format!("pointer({})", self.describe_type(*target_type_id))
            }
            crate::types::TypePayload::Array { element_type_id, fixed_count } => {
                format!("array({}, {})", self.describe_type(*element_type_id), fixed_count)
            }
            _ => info.prim.name().to_string(),
        }
    }

    /// All type names mentioned but never concretely defined — a linkage
    /// error once the linkage is consumed by lowering (§3.3, §7 taxonomy 2).
    pub fn unresolved_forward_refs(&self) -> Vec<String> {
        self.name_to_type
            .iter()
            .filter(|(_, &id)| !self.type_defs[id as usize].is_defined())
            .map(|(name, _)| name.clone())
            .collect()
    }

    // --- fields ---------------------------------------------------------

    pub fn push_fields(&mut self, field_types: &[TypeId]) -> (u32, u32) {
        let start = self.fields.len() as u32;
        self.fields.extend(field_types.iter().map(|&type_id| FieldSlot { type_id }));
        (start, field_types.len() as u32)
    }

    // --- functions --------------------------------------------------------

    /// Register a fully-parsed function/module. Insertion order is
    /// preserved in `irs_ordered` and drives emission order (§3.7, §5).
    pub fn register(&mut self, ir: FunctionIr) -> usize {
        let index = self.irs_ordered.len();
        if let Some(name) = &ir.link_name {
            self.irs_by_name.insert(name.clone(), index);
        }
        self.irs_ordered.push(ir);
        index
    }

    pub fn get_by_name(&self, name: &str) -> Option<&FunctionIr> {
        self.irs_by_name.get(name).map(|&idx| &self.irs_ordered[idx])
    }

    pub fn functions(&self) -> &[FunctionIr] {
        &self.irs_ordered
    }

    pub fn functions_mut(&mut self) -> &mut [FunctionIr] {
        &mut self.irs_ordered
    }

    pub fn real_functions(&self) -> impl Iterator<Item = &FunctionIr> {
        self.irs_ordered.iter().filter(|f| f.is_real_function())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Primitive;

    #[test]
    fn unknown_is_reserved_at_id_zero() {
        let linkage = Linkage::new();
        assert_eq!(linkage.type_info(0).prim, Primitive::Unknown);
    }

    #[test]
    fn forward_reference_then_define_keeps_same_id() {
        let mut linkage = Linkage::new();
        let forward_id = linkage.forward_reference_type("Node");
        assert!(linkage.unresolved_forward_refs().contains(&"Node".to_string()));

        linkage.define_type_by_id(forward_id, TypeInfo::plain(Primitive::S32)).unwrap();
        assert!(linkage.unresolved_forward_refs().is_empty());
    }

    #[test]
    fn redefining_a_defined_type_is_an_error() {
        let mut linkage = Linkage::new();
        let id = linkage.forward_reference_type("T");
        linkage.define_type_by_id(id, TypeInfo::plain(Primitive::U8)).unwrap();
        let err = linkage.define_type_by_id(id, TypeInfo::plain(Primitive::U8));
        assert!(matches!(err, Err(TacError::TypeRedefined { .. })));
    }

    #[test]
    fn reference_to_unknown_name_is_an_error() {
        let linkage = Linkage::new();
        assert!(matches!(linkage.reference_type("Ghost"), Err(TacError::UnknownType { .. })));
    }

    #[test]
    fn function_registration_preserves_insertion_order() {
        let mut linkage = Linkage::new();
        let mut a = FunctionIr::new();
        a.link_name = Some("a".to_string());
        let mut b = FunctionIr::new();
        b.link_name = Some("b".to_string());
        linkage.register(a);
        linkage.register(b);
        let names: Vec<_> = linkage.functions().iter().map(|f| f.link_name.clone().unwrap()).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
