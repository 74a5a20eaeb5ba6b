//! Builder for the instruction stream produced by code generation.
//!
//! Instructions are encoded into a flat byte buffer immediately; jump
//! targets are side-recorded as labels (id + offset) instead of being
//! written inline, and function addresses are left as placeholders that
//! the emitter patches once the final file layout is known.
//!
//! All multi-byte operands are little-endian. String operands are an `i32`
//! byte count (including the terminating NUL) followed by the raw bytes and
//! the NUL.

use crate::{bytecode::Opcode, state::Label};

/// A `u64` address operand to be resolved to a label's file offset.
#[derive(Debug, Clone, Copy)]
pub struct AddressFixup {
    /// Byte offset of the placeholder within the instruction buffer.
    pub offset: usize,
    /// Label whose final address belongs there.
    pub label_id: u32,
}

/// Accumulates encoded instructions, labels, and address fixups.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    labels: Vec<Label>,
    fixups: Vec<AddressFixup>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset into the instruction bytes; the next instruction or
    /// label lands here.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bytecode.len() as u64
    }

    /// Records a jump target at the current position.
    pub fn mark_label(&mut self, id: u32) {
        self.labels.push(Label {
            id,
            location: self.position(),
        });
    }

    pub fn emit(&mut self, op: Opcode) {
        self.bytecode.push(op as u8);
    }

    pub fn push_u8(&mut self, value: u8) {
        self.bytecode.push(value);
    }

    pub fn push_u32(&mut self, value: u32) {
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i32(&mut self, value: i32) {
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u64(&mut self, value: u64) {
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i64(&mut self, value: i64) {
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_f64(&mut self, value: f64) {
        self.bytecode.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a string operand: `i32` length including the NUL, bytes,
    /// NUL.
    pub fn push_string(&mut self, text: &str) {
        let len = i32::try_from(text.len() + 1).expect("string operand exceeds i32 range");
        self.push_i32(len);
        self.bytecode.extend_from_slice(text.as_bytes());
        self.bytecode.push(0);
    }

    /// Appends a placeholder `u64` address to be patched with the resolved
    /// location of `label_id`.
    pub fn push_address_of(&mut self, label_id: u32) {
        self.fixups.push(AddressFixup {
            offset: self.bytecode.len(),
            label_id,
        });
        self.push_u64(0);
    }

    // convenience emitters for the common opcode+operand shapes

    pub fn emit_with_string(&mut self, op: Opcode, text: &str) {
        self.emit(op);
        self.push_string(text);
    }

    pub fn emit_with_u32(&mut self, op: Opcode, value: u32) {
        self.emit(op);
        self.push_u32(value);
    }

    pub fn emit_load_integer(&mut self, value: i64) {
        self.emit(Opcode::LoadInteger);
        self.push_i64(value);
    }

    pub fn emit_load_float(&mut self, value: f64) {
        self.emit(Opcode::LoadFloat);
        self.push_f64(value);
    }

    pub fn emit_new_function(&mut self, is_global: bool, nargs: u32, is_variadic: bool, body_label: u32) {
        self.emit(Opcode::NewFunction);
        self.push_u8(u8::from(is_global));
        self.push_u32(nargs);
        self.push_u8(u8::from(is_variadic));
        self.push_address_of(body_label);
    }

    /// Tears the builder apart for the emitter.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, Vec<Label>, Vec<AddressFixup>) {
        (self.bytecode, self.labels, self.fixups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNull);
        builder.emit(Opcode::Pop);

        let (bytes, labels, fixups) = builder.into_parts();
        assert_eq!(bytes, vec![Opcode::LoadNull as u8, Opcode::Pop as u8]);
        assert!(labels.is_empty());
        assert!(fixups.is_empty());
    }

    #[test]
    fn test_operands_little_endian() {
        let mut builder = CodeBuilder::new();
        builder.emit_with_u32(Opcode::Jump, 0x1234);

        let (bytes, ..) = builder.into_parts();
        assert_eq!(bytes, vec![Opcode::Jump as u8, 0x34, 0x12, 0, 0]);
    }

    #[test]
    fn test_string_operand_includes_nul() {
        let mut builder = CodeBuilder::new();
        builder.emit_with_string(Opcode::LoadLocal, "M_x");

        let (bytes, ..) = builder.into_parts();
        assert_eq!(bytes[0], Opcode::LoadLocal as u8);
        assert_eq!(&bytes[1..5], &4i32.to_le_bytes());
        assert_eq!(&bytes[5..9], b"M_x\0");
    }

    #[test]
    fn test_labels_record_positions() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::Nop);
        builder.mark_label(7);
        builder.emit(Opcode::Pop);

        let (_, labels, _) = builder.into_parts();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].id, 7);
        assert_eq!(labels[0].location, 1);
    }

    #[test]
    fn test_new_function_records_fixup() {
        let mut builder = CodeBuilder::new();
        builder.emit_new_function(true, 2, false, 3);

        let (bytes, _, fixups) = builder.into_parts();
        // opcode + is_global + nargs + variadic + address
        assert_eq!(bytes.len(), 1 + 1 + 4 + 1 + 8);
        assert_eq!(fixups.len(), 1);
        assert_eq!(fixups[0].label_id, 3);
        assert_eq!(fixups[0].offset, 7);
    }
}
