//! Error taxonomy for the Tacit compiler back end.
//!
//! Every compilation error is fatal to the current call (§7 policy): nothing
//! here is retried or auto-corrected, and the linkage must not retain a
//! partially-registered function after a failed `asm` call. Callers that
//! embed this crate surface a `TacError` however their host does exceptions;
//! the CLI wraps it in `anyhow`.

use thiserror::Error;

/// How a register is identified in a diagnostic message.
///
/// Registers introduced by a symbol remember that symbol; anonymous
/// registers (introduced by a bare integer id) render as `value[N]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterRef {
    Named(String),
    Anonymous(u32),
}

impl std::fmt::Display for RegisterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterRef::Named(name) => write!(f, "{name}"),
            RegisterRef::Anonymous(id) => write!(f, "value[{id}]"),
        }
    }
}

/// The main error type for the Tacit back end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TacError {
    // --- 1. Parse errors --------------------------------------------------
    #[error("parse error: unknown opcode `{opcode}`")]
    UnknownOpcode { opcode: String },

    #[error("parse error: `{opcode}` expects {expected} operand(s), got {actual}")]
    WrongArity {
        opcode: String,
        expected: usize,
        actual: usize,
    },

    #[error("parse error: unknown primitive `{name}`")]
    UnknownPrimitive { name: String },

    #[error("parse error: unknown calling convention `{name}`")]
    UnknownCallingConvention { name: String },

    #[error("parse error: label `{name}` redefined")]
    LabelRedefined { name: String },

    #[error("parse error: malformed tuple: {tuple}")]
    MalformedTuple { tuple: String },

    // --- 2. Linkage errors --------------------------------------------------
    #[error("cannot redefine type {name}")]
    TypeRedefined { name: String },

    #[error("reference to unknown type `{name}`")]
    UnknownType { name: String },

    #[error("forward reference to type `{name}` was never resolved")]
    UnresolvedForwardRef { name: String },

    // --- 3. Inference errors --------------------------------------------------
    #[error("unable to infer type for {register}")]
    UninferredRegister { register: RegisterRef },

    // --- 4. Type errors --------------------------------------------------
    /// `detail` is fully composed at construction time (opcode, register,
    /// and both offending type names per §6.4) so the Display impl stays a
    /// plain passthrough.
    #[error("{detail}")]
    TypeMismatch { detail: String },

    #[error("{opcode}: constant not representable in declared type `{type_name}`")]
    ConstantNotRepresentable { opcode: String, type_name: String },

    // --- 5. Structural errors --------------------------------------------------
    #[error("function `{name}` body is not terminated by `jump` or `return`")]
    UnterminatedFunction { name: String },

    #[error("function `{name}` has {param_count} parameter(s) but only {register_count} register(s)")]
    TooFewRegistersForParams {
        name: String,
        param_count: u32,
        register_count: u32,
    },

    #[error("type-only module `{name}` contains executable instructions")]
    ExecutableInTypeOnlyModule { name: String },

    // --- 6. Lowering errors --------------------------------------------------
    #[error("{target}: unsupported opcode `{opcode}` ({reason})")]
    UnsupportedOnTarget {
        target: String,
        opcode: String,
        reason: String,
    },

    #[error("io error: {message}")]
    Io { message: String },
}

impl TacError {
    /// Build a `TypeMismatch` with the opcode name, offending register (if
    /// known), and up to two named types — the fields §6.4 requires every
    /// checker diagnostic to carry.
    pub fn type_mismatch(
        opcode: impl std::fmt::Display,
        message: impl std::fmt::Display,
        register: Option<RegisterRef>,
        expected_type: Option<&str>,
        found_type: Option<&str>,
    ) -> Self {
        let mut detail = format!("{opcode}: {message}");
        if let Some(r) = &register {
            detail.push_str(&format!(", at {r}"));
        }
        match (expected_type, found_type) {
            (Some(a), Some(b)) => detail.push_str(&format!(" (expected `{a}`, found `{b}`)")),
            (Some(a), None) => detail.push_str(&format!(" (`{a}`)")),
            (None, Some(b)) => detail.push_str(&format!(" (`{b}`)")),
            (None, None) => {}
        }
        TacError::TypeMismatch { detail }
    }
}

/// Result type alias for Tacit back-end operations.
pub type TacResult<T> = Result<T, TacError>;

impl From<std::io::Error> for TacError {
    fn from(err: std::io::Error) -> Self {
        TacError::Io {
            message: err.to_string(),
        }
    }
}
