#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod guest;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod resolver;
pub mod tasks;
pub mod util;
