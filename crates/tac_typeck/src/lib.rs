//! Type inference and checking (§4.2).
//!
//! [`infer::infer`] populates `linkage.type_defs` and register bindings
//! from the type-forming instructions a function already carries;
//! [`check::check`] then enforces the per-opcode typing contracts and
//! constant-validity rules. Run both, in order, once per function — and
//! again for any function re-checked after a rewrite (scalarization runs
//! `check` again to confirm it preserved well-typedness).

pub mod check;
pub mod infer;

pub use check::check;
pub use infer::infer;
