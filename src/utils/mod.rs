//! Process-level helpers shared by the binary and the library.

pub mod bootstrap;
pub mod retry;
