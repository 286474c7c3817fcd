//! Opcode table (spec component A): the closed set of instruction opcodes,
//! name<->enum lookup, and the calling-convention table used by `call`.

/// The closed set of IR opcodes. `Instruction` picks the active payload by
/// shape (§3.4); `Opcode` alone is what diagnostics, the parser, and the
/// checker's per-opcode rule table key off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Move,
    Cast,
    BNot,
    Load,
    Store,
    Address,
    Add,
    Sub,
    Mul,
    Div,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    PointerAdd,
    PointerSubtract,
    Gt,
    Lt,
    Eq,
    Neq,
    Gte,
    Lte,
    AGetP,
    APGetP,
    FGetP,
    Call,
    Syscall,
    Arg,
    Jump,
    Branch,
    BranchNot,
    Return,
    Label,
    TypePrim,
    TypePointer,
    TypeArray,
    TypeStruct,
    TypeUnion,
    TypeBind,
}

const OPCODE_NAMES: &[(&str, Opcode)] = &[
    ("add", Opcode::Add),
    ("address", Opcode::Address),
    ("agetp", Opcode::AGetP),
    ("apgetp", Opcode::APGetP),
    ("arg", Opcode::Arg),
    ("band", Opcode::Band),
    ("bind", Opcode::TypeBind),
    ("bnot", Opcode::BNot),
    ("bor", Opcode::Bor),
    ("branch", Opcode::Branch),
    ("branch-not", Opcode::BranchNot),
    ("bxor", Opcode::Bxor),
    ("call", Opcode::Call),
    ("cast", Opcode::Cast),
    ("div", Opcode::Div),
    ("eq", Opcode::Eq),
    ("fgetp", Opcode::FGetP),
    ("gt", Opcode::Gt),
    ("gte", Opcode::Gte),
    ("jump", Opcode::Jump),
    ("label", Opcode::Label),
    ("load", Opcode::Load),
    ("lt", Opcode::Lt),
    ("lte", Opcode::Lte),
    ("move", Opcode::Move),
    ("mul", Opcode::Mul),
    ("neq", Opcode::Neq),
    ("pointer-add", Opcode::PointerAdd),
    ("pointer-subtract", Opcode::PointerSubtract),
    ("return", Opcode::Return),
    ("shl", Opcode::Shl),
    ("shr", Opcode::Shr),
    ("store", Opcode::Store),
    ("sub", Opcode::Sub),
    ("syscall", Opcode::Syscall),
    ("type-array", Opcode::TypeArray),
    ("type-pointer", Opcode::TypePointer),
    ("type-prim", Opcode::TypePrim),
    ("type-struct", Opcode::TypeStruct),
    ("type-union", Opcode::TypeUnion),
];

impl Opcode {
    pub fn from_name(name: &str) -> Option<Opcode> {
        OPCODE_NAMES
            .binary_search_by_key(&name, |(n, _)| n)
            .ok()
            .map(|idx| OPCODE_NAMES[idx].1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Move => "move",
            Opcode::Cast => "cast",
            Opcode::BNot => "bnot",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Address => "address",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Band => "band",
            Opcode::Bor => "bor",
            Opcode::Bxor => "bxor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::PointerAdd => "pointer-add",
            Opcode::PointerSubtract => "pointer-subtract",
            Opcode::Gt => "gt",
            Opcode::Lt => "lt",
            Opcode::Eq => "eq",
            Opcode::Neq => "neq",
            Opcode::Gte => "gte",
            Opcode::Lte => "lte",
            Opcode::AGetP => "agetp",
            Opcode::APGetP => "apgetp",
            Opcode::FGetP => "fgetp",
            Opcode::Call => "call",
            Opcode::Syscall => "syscall",
            Opcode::Arg => "arg",
            Opcode::Jump => "jump",
            Opcode::Branch => "branch",
            Opcode::BranchNot => "branch-not",
            Opcode::Return => "return",
            Opcode::Label => "label",
            Opcode::TypePrim => "type-prim",
            Opcode::TypePointer => "type-pointer",
            Opcode::TypeArray => "type-array",
            Opcode::TypeStruct => "type-struct",
            Opcode::TypeUnion => "type-union",
            Opcode::TypeBind => "bind",
        }
    }

    /// Arithmetic/bitwise/shift ops requiring `lhs == rhs == dest` (§4.2).
    pub fn is_uniform_binary(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Band
                | Opcode::Bor
                | Opcode::Bxor
                | Opcode::Shl
                | Opcode::Shr
        )
    }

    pub fn is_integer_only(self) -> bool {
        matches!(self, Opcode::Band | Opcode::Bor | Opcode::Bxor | Opcode::Shl | Opcode::Shr)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::Gt | Opcode::Lt | Opcode::Eq | Opcode::Neq | Opcode::Gte | Opcode::Lte
        )
    }

    /// Element-pointer ops eligible for scalarization's descent (§4.2, §4.3).
    pub fn is_array_descendable(self) -> bool {
        self.is_uniform_binary() || self.is_comparison()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Calling conventions (spec component A table): looked up from the `cc`
/// keyword on `call`/`syscall`, and the function-level declared convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    #[default]
    Sysv,
    Windows,
}

impl CallingConvention {
    pub fn from_name(name: &str) -> Option<CallingConvention> {
        match name {
            "sysv" => Some(CallingConvention::Sysv),
            "windows" => Some(CallingConvention::Windows),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CallingConvention::Sysv => "sysv",
            CallingConvention::Windows => "windows",
        }
    }
}

impl std::fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_is_sorted() {
        let mut sorted = OPCODE_NAMES.to_vec();
        sorted.sort_by_key(|(n, _)| *n);
        assert_eq!(OPCODE_NAMES, sorted.as_slice());
    }

    #[test]
    fn round_trips_every_opcode_name() {
        for &(name, op) in OPCODE_NAMES {
            assert_eq!(Opcode::from_name(name), Some(op));
            assert_eq!(op.name(), name);
        }
    }

    #[test]
    fn calling_convention_round_trip() {
        assert_eq!(CallingConvention::from_name("sysv"), Some(CallingConvention::Sysv));
        assert_eq!(CallingConvention::from_name("windows"), Some(CallingConvention::Windows));
        assert_eq!(CallingConvention::from_name("bogus"), None);
    }
}
