#![doc = "Monotonic clock reader and the services that keep its base pair current."]

pub mod anchor;
pub mod counter;
pub mod interrupt;
pub mod rebase_timer;
pub mod service;
#[cfg(unix)]
pub mod signal_timer;

pub use anchor::*;
pub use counter::*;
pub use interrupt::*;
pub use rebase_timer::*;
pub use service::*;
#[cfg(unix)]
pub use signal_timer::*;
