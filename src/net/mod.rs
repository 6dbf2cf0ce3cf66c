//! Loopback networking primitives: port allocation, pinned sockets, framing.

pub mod frame;
mod port_allocator;
mod socket_factory;

pub use port_allocator::get_available_port;
pub use socket_factory::BridgeSocketFactory;
