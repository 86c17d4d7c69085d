// src/runtime/mod.rs

//! Async coordination primitives shared by pipes and sockets.

pub mod close_signal;
pub mod waitgroup;

pub use close_signal::CloseSignal;
pub(crate) use waitgroup::WaitGroup;
