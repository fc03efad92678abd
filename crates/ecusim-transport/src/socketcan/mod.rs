//! SocketCAN transport adapter (Linux only)

mod adapter;

pub use adapter::SocketCanBus;
