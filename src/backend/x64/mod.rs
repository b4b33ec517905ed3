//! The x86-64 backend: host code emission, register allocation, the
//! dispatcher, and the block cache.

pub mod abi;
pub mod block_cache;
pub mod block_of_code;
pub mod callback;
pub mod core;
pub mod emit;
pub mod emit_a32;
pub mod emit_a64;
pub mod emit_coprocessor;
pub mod emit_crypto;
pub mod emit_data_processing;
pub mod emit_memory;
pub mod emit_saturation;
pub mod emit_terminal;
pub mod emit_context;
pub mod fast_dispatch;
pub mod fastmem;
pub mod hostloc;
pub mod jit_state;
pub mod nzcv;
pub mod patch_info;
pub mod reg_alloc;
pub mod stack_layout;
