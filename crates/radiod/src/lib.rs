//! `radiod`: internet radio daemon built on `radio-player`.

pub mod cli;
pub mod config;
pub mod http_api;
pub mod runtime;
