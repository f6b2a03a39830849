//! Patches the tick timing of the game's classes as they're loaded.
//!
//! The server's tick length literal is replaced with a read of a static field of a helper class, and the client's
//! display update is redirected to a static method of the same helper, so that both can be controlled at runtime.
//! Everything goes through [`Transformer::transform`], which never fails: any class it can't patch is returned as is.

pub mod archive;
pub mod config;
pub mod mapping;
pub mod matcher;
pub mod observer;
pub mod rules;
pub mod transformer;

pub use config::Config;
pub use observer::{Event, LogObserver, Observer};
pub use transformer::Transformer;
