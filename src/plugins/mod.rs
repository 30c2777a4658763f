//! Board subsystems. Each exposes a clap sub-CLI, a `run_*_cli` dispatcher and a
//! `schema()` descriptor, on top of plain library functions.

pub mod accounts;
pub mod auth;
pub mod notify;
pub mod posts;
pub mod quota;
pub mod threads;
pub mod throttle;
pub mod votes;
