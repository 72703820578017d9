//! gantry-native: a ptrace execution engine for gantry.
//!
//! Each debuggee runs under its own tracer thread. Breakpoints are `int3`
//! patches placed at addresses found through the executable's DWARF line
//! table. Only single-threaded Linux x86_64 debuggees are supported; other
//! targets build, but every launch fails with an unsupported error.

pub mod backend;
pub mod breakpoint;
pub mod error;
pub mod line_table;
#[cfg(target_os = "linux")]
pub mod memory;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod tracer;

pub use backend::NativeBackend;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use backend::NativeDebuggee;
pub use error::NativeError;
pub use line_table::LineTable;
