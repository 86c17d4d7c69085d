//! Connection-level wire details shared by the stream transports.

pub mod sp;
