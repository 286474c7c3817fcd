//! IR tuple-syntax reader and writer (§4.1, §6.2).
//!
//! [`parser::parse_into`] turns one flat sequence of surface forms into a
//! `FunctionIr` registered in a shared `tac_ir::Linkage`; [`printer`] goes
//! the other way for the `to-ir` host operation and round-trip testing.

pub mod parser;
pub mod printer;
pub mod sexpr;

pub use parser::parse_into;
pub use printer::print_linkage;
pub use sexpr::SExpr;
