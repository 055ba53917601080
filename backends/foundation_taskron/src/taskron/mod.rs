mod constants;
mod context;
mod pool;
mod queue;
mod scheduler;
mod task;
mod worker;

pub use constants::*;
pub use context::*;
pub use pool::*;
pub use queue::*;
pub use scheduler::*;
pub use task::*;
pub use worker::*;
