//! armjit — a dynamic binary translator for ARMv8 guests on x86-64 hosts.
//!
//! Guest basic blocks are decoded into a typed SSA microinstruction IR,
//! optimized, and lowered to native host code held in a persistent code
//! cache. The embedder provides memory and system callbacks through the
//! traits in [`config`] and drives execution through [`jit::A32Jit`] or
//! [`jit::A64Jit`].
//!
//! ```no_run
//! use armjit::config::{A64Config, A64Callbacks};
//! # struct Env;
//! # impl A64Callbacks for Env {
//! #     fn memory_read_code(&self, _: u64) -> Option<u32> { None }
//! #     fn memory_read_8(&self, _: u64) -> u8 { 0 }
//! #     fn memory_read_16(&self, _: u64) -> u16 { 0 }
//! #     fn memory_read_32(&self, _: u64) -> u32 { 0 }
//! #     fn memory_read_64(&self, _: u64) -> u64 { 0 }
//! #     fn memory_write_8(&mut self, _: u64, _: u8) {}
//! #     fn memory_write_16(&mut self, _: u64, _: u16) {}
//! #     fn memory_write_32(&mut self, _: u64, _: u32) {}
//! #     fn memory_write_64(&mut self, _: u64, _: u64) {}
//! #     fn call_supervisor(&mut self, _: u32) {}
//! #     fn exception_raised(&mut self, _: u64, _: u64) {}
//! #     fn add_ticks(&mut self, _: u64) {}
//! #     fn get_ticks_remaining(&self) -> u64 { 0 }
//! # }
//! let config = A64Config::new(Box::new(Env));
//! let mut jit = armjit::jit::A64Jit::new(config).unwrap();
//! jit.set_pc(0x1000);
//! let reason = jit.run();
//! # let _ = reason;
//! ```

pub mod common;
pub mod config;
pub mod exclusive_monitor;
pub mod halt_reason;
pub mod ir;
pub mod frontend;
pub mod backend;
pub mod jit;

pub use config::{A32Config, A64Config, JitError, OptimizationFlag};
pub use exclusive_monitor::ExclusiveMonitor;
pub use halt_reason::HaltReason;
pub use jit::{A32Jit, A64Jit};
