//! Shared error types and source location tracking for the Tacit compiler
//! back end.
//!
//! This crate is deliberately small: it holds the one taxonomy of errors
//! (§7) that every other crate in the workspace raises, and the
//! `SourcePos` type instructions carry for `#line`-directive emission.

pub mod error;
pub mod span;

pub use error::{RegisterRef, TacError, TacResult};
pub use span::SourcePos;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ref_display() {
        assert_eq!(RegisterRef::Named("x".into()).to_string(), "x");
        assert_eq!(RegisterRef::Anonymous(3).to_string(), "value[3]");
    }

    #[test]
    fn type_mismatch_includes_opcode_register_and_types() {
        let err = TacError::type_mismatch(
            "add",
            "lhs/rhs/dest must agree",
            Some(RegisterRef::Named("r0".into())),
            Some("s32"),
            Some("u32"),
        );
        let msg = err.to_string();
        assert!(msg.contains("add"));
        assert!(msg.contains("r0"));
        assert!(msg.contains("s32"));
        assert!(msg.contains("u32"));
    }

    #[test]
    fn source_pos_none_has_no_position() {
        assert!(!SourcePos::NONE.has_position());
        assert!(SourcePos::new(3, 1).has_position());
    }
}
