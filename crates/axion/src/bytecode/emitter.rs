//! Serializes an instruction stream to the on-disk bytecode layout.
//!
//! File layout:
//!
//! 1. magic bytes (`AXBC`)
//! 2. fixed-length version string (8 bytes, NUL padded)
//! 3. label prologue: one `store_address` record per label, carrying the
//!    label's offset into the final file
//! 4. the instruction body
//!
//! Stream positions are absolute file offsets, so a label recorded at
//! instruction offset `p` is written as `p + header + prologue`. Function
//! address placeholders in the body are patched with the same rebased
//! offsets before writing.

use crate::{
    bytecode::{Opcode, builder::AddressFixup},
    state::Label,
};

/// File signature.
pub const MAGIC: &[u8; 4] = b"AXBC";
/// Fixed-length version field.
pub const VERSION: &[u8; 8] = b"0.1.0\0\0\0";
/// Bytes before the label prologue.
pub const HEADER_LEN: u64 = (MAGIC.len() + VERSION.len()) as u64;
/// Size of one prologue record: opcode byte + `u32` id + `u64` offset.
pub const STORE_ADDRESS_RECORD_LEN: u64 = 1 + 4 + 8;

/// Writes the final bytecode image.
#[derive(Debug)]
pub struct BytecodeEmitter {
    bytecode: Vec<u8>,
    labels: Vec<Label>,
    fixups: Vec<AddressFixup>,
}

impl BytecodeEmitter {
    #[must_use]
    pub fn new(bytecode: Vec<u8>, labels: Vec<Label>, fixups: Vec<AddressFixup>) -> Self {
        Self {
            bytecode,
            labels,
            fixups,
        }
    }

    /// Emits header, prologue, and patched instruction body.
    #[must_use]
    pub fn emit(mut self) -> Vec<u8> {
        let prologue_len = self.labels.len() as u64 * STORE_ADDRESS_RECORD_LEN;
        let body_base = HEADER_LEN + prologue_len;

        // patch function address placeholders to absolute file offsets
        for fixup in &self.fixups {
            let label = self
                .labels
                .iter()
                .find(|l| l.id == fixup.label_id)
                .expect("address fixup refers to an unrecorded label");
            let address = label.location + body_base;
            self.bytecode[fixup.offset..fixup.offset + 8].copy_from_slice(&address.to_le_bytes());
        }

        let mut out = Vec::with_capacity(body_base as usize + self.bytecode.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(VERSION);

        for label in &self.labels {
            out.push(Opcode::StoreAddress as u8);
            out.extend_from_slice(&label.id.to_le_bytes());
            out.extend_from_slice(&(label.location + body_base).to_le_bytes());
        }

        out.extend_from_slice(&self.bytecode);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeBuilder;

    #[test]
    fn test_header_and_prologue_layout() {
        let mut builder = CodeBuilder::new();
        builder.mark_label(1);
        builder.emit(Opcode::Nop);

        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();

        assert_eq!(&image[..4], MAGIC);
        assert_eq!(&image[4..12], VERSION);

        // one prologue record
        assert_eq!(image[12], Opcode::StoreAddress as u8);
        assert_eq!(&image[13..17], &1u32.to_le_bytes());
        // label at instruction offset 0 -> file offset 12 + 13
        assert_eq!(&image[17..25], &25u64.to_le_bytes());

        assert_eq!(image[25], Opcode::Nop as u8);
    }

    #[test]
    fn test_function_address_patched() {
        let mut builder = CodeBuilder::new();
        builder.emit_new_function(true, 0, false, 9);
        builder.mark_label(9);
        builder.emit(Opcode::Return);

        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();

        // one label -> body starts at 12 + 13 = 25; the body label sits
        // after the 15-byte new_function instruction
        let expected = 25u64 + 15;
        let addr_offset = 25 + 7; // opcode + is_global + nargs + variadic
        assert_eq!(&image[addr_offset..addr_offset + 8], &expected.to_le_bytes());
    }

    #[test]
    fn test_emission_is_deterministic() {
        let build = || {
            let mut builder = CodeBuilder::new();
            builder.mark_label(1);
            builder.emit_with_string(Opcode::LoadLocal, "M_x");
            builder.emit_with_u32(Opcode::Jump, 1);
            let (bytes, labels, fixups) = builder.into_parts();
            BytecodeEmitter::new(bytes, labels, fixups).emit()
        };
        assert_eq!(build(), build());
    }
}
