mod types;

pub use types::*;

pub mod synchro;
pub mod taskron;
