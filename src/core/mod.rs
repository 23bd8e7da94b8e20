//! Core functionality for watching files, settings, and errors

pub mod config;
pub mod error;
pub mod observer;
pub mod watch;
