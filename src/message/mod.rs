//! Message container passed between transports, pipes and sockets.

mod msg;

pub use msg::Msg;
