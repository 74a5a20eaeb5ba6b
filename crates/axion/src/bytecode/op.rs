//! The opcode set.
//!
//! Numeric values are assigned densely from 0 in declaration order and form
//! a stable on-disk contract: they must never be renumbered. Operand widths
//! are fixed per opcode (strings are length-prefixed), so a skipped
//! instruction can always consume exactly its operand bytes.

use strum::{Display, FromRepr, IntoStaticStr};

/// One VM instruction tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    /// Open a stack frame (increase frame level).
    Ifl,
    /// Close a stack frame; decrements the read level if it matched.
    Dfl,
    /// Increase the read level (when it matches the frame level).
    Irl,
    /// Decrease the read level by a `u8` count.
    Drl,
    /// Pop the condition, remember it, and advance the read level if true.
    IrlIfTrue,
    /// Advance the read level if the remembered condition was false.
    IrlIfFalse,
    /// `u32` id, `u64` offset: record a jump target.
    StoreAddress,
    /// `u32` id: seek to a recorded target.
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    /// Run the following block with exception handling enabled.
    TryCatchBlock,
    /// string: pop the top of the stack into a named frame local.
    StoreAsLocal,
    /// string: reserved; create a variable by name.
    NewVariable,
    /// string: reserved; create a native object by type name.
    NewNativeObject,
    /// Pop index and object, push the selected field.
    ArrayIndex,
    /// string: add a named member to the top object.
    NewMember,
    /// string: read a named member of the top object.
    LoadMember,
    /// `u8` is_global, `u32` nargs, `u8` variadic, `u64` address.
    NewFunction,
    /// `u32` nargs: pop the callee and invoke it.
    InvokeObject,
    /// string name, `i32` nargs: call a bound native function.
    InvokeNative,
    /// Return to the caller (recognized by the call protocol).
    Return,
    /// Close the frame and drop the read level.
    Leave,
    /// `i32` levels: force an ancestor condition false, drop read levels.
    Break,
    /// `i32` levels: force an ancestor condition true, drop read levels.
    Continue,
    /// `u32` count: pop and print that many values, then a newline.
    Print,
    /// string: push a frame local found by walking frames outward.
    LoadLocal,
    /// `i64` literal.
    LoadInteger,
    /// `f64` literal.
    LoadFloat,
    /// string literal.
    LoadString,
    LoadNull,
    /// Pop the top of the stack (deleting temporaries).
    Pop,

    // binary operators: pop right, pop left, push result
    Pow,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eql,
    Neql,
    Less,
    Greater,
    LessEql,
    GreaterEql,
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,

    // assignment operators: pop right, mutate the remaining left in place
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,

    // unary operators: replace the top of the stack
    UnaryMinus,
    UnaryNot,
}

impl Opcode {
    /// Decodes an opcode byte, or `None` for an unrecognized value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_numbering_contract() {
        // spot checks on the stable numbering; changing any of these breaks
        // every bytecode file ever emitted
        assert_eq!(Opcode::Nop as u8, 0);
        assert_eq!(Opcode::StoreAddress as u8, 7);
        assert_eq!(Opcode::TryCatchBlock as u8, 11);
        assert_eq!(Opcode::NewFunction as u8, 18);
        assert_eq!(Opcode::Print as u8, 25);
        assert_eq!(Opcode::Pop as u8, 31);
        assert_eq!(Opcode::Pow as u8, 32);
        assert_eq!(Opcode::Assign as u8, 51);
        assert_eq!(Opcode::UnaryNot as u8, 57);
    }

    #[test]
    fn test_round_trip() {
        for byte in 0..=57u8 {
            let op = Opcode::from_byte(byte).expect("dense range must decode");
            assert_eq!(op as u8, byte);
        }
        assert!(Opcode::from_byte(58).is_none());
        assert!(Opcode::from_byte(255).is_none());
    }
}
