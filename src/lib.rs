#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod bundler;
pub mod config;
mod core;
pub mod engine;
mod error;
#[cfg(feature = "server")]
pub mod http;
pub mod lint;
pub mod loader;
pub mod output;
#[cfg(feature = "live")]
pub mod reload;
pub mod tasks;
pub mod transform;
mod utils;
#[cfg(feature = "live")]
pub mod watch;

pub use crate::config::Config;
pub use crate::core::{Environment, Profile};
pub use crate::engine::{Blueprint, RunReport, TaskGraph, TaskId};
pub use crate::error::*;
pub use crate::tasks::{Tasks, register};
pub use crate::utils::{LOG_ENV, clear_dist, init_logging};
