//! Bytecode: the opcode set, the instruction builder used by the code
//! generator, and the file emitter.

mod builder;
mod emitter;
mod op;

pub use builder::{AddressFixup, CodeBuilder};
pub use emitter::{BytecodeEmitter, HEADER_LEN, MAGIC, STORE_ADDRESS_RECORD_LEN, VERSION};
pub use op::Opcode;
