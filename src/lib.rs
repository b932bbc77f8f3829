pub mod canon;
pub mod closure;
pub mod db;
mod densemap;
pub mod error;
pub mod fs;
pub mod graph;
pub mod plan;
mod process;
mod process_posix;
pub mod progress;
pub mod run;
pub mod session;
mod signal;
pub mod task;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
