pub mod config;
pub mod error;
pub mod playback;
pub mod poll;
pub mod runtime;
pub mod trigger;
pub mod util;

pub use config::KioskConfig;
pub use runtime::Runtime;
