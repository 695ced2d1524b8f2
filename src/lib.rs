#![forbid(unsafe_code)]

pub mod book;
pub mod catalog;
pub mod cli;
pub mod convert;
pub mod covers;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod listing;
pub mod logging;
pub mod mapping;
pub mod merge;
pub mod ranking;
pub mod ratings;
pub mod sheet;
pub mod stacks;
