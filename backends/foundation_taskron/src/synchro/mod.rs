mod counter;
mod drops;
mod signals;

pub use counter::*;
pub use drops::*;
pub use signals::*;
