pub mod compiler;
pub mod disasm;
pub mod emit;
pub mod serialize;
pub mod vm;

pub use compiler::{compile, compile_at, compile_many, native_op, MAX_COMPILE_DEPTH};
pub use disasm::disassemble;
pub use emit::Emitter;
pub use serialize::{
    decode_instruction, deserialize, deserialize_with_table, encode_instruction, read_from,
    serialize, write_to, StringTable,
};
pub use vm::Vm;
