pub mod event;
pub mod instrument;
pub mod order;
pub mod phase;
pub mod tick;

pub use event::*;
pub use instrument::*;
pub use order::*;
pub use phase::*;
pub use tick::*;
