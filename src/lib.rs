#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod core;
mod engine;
mod error;
pub mod io;
pub mod recipe;
pub mod stream;
pub mod transform;

pub use crate::blueprint::Blueprint;
pub use crate::core::{Environment, Mode, TaskContext};
pub use crate::engine::{
    Completion, Diagnostics, Reloader, Serve, Signal, Task, TaskExecution, TaskGraph, TaskResult,
    Trigger, Triggered, WatchRule, WatchRules,
};
pub use crate::error::*;

#[cfg(feature = "live")]
pub use crate::engine::runner::reload::{LiveReload, start as start_live_reload};
