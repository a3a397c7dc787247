//! TCP transport between an encoding and a decoding process.
//!
//! [`connection`] establishes the peer relationship and moves exact byte
//! counts; [`wire`] frames compressed packets on top of it.

pub mod connection;
pub mod wire;

pub use connection::{ConnectOptions, Connection, LazyConnection, Listener, Role};
pub use wire::{read_packet, read_packet_len, write_end_of_stream, write_packet, PacketReader};
