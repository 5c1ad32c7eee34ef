//! multiquery: run one MySQL query across many databases on a server,
//! optionally through an SSH tunnel.

pub mod app;
pub mod config;
pub mod error;
pub mod output;
pub mod services;
