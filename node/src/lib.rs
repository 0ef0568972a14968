//! Node runtime: the peer table and socket lifecycle, protocol
//! dispatch, and the mining worker. The binary in `main.rs` wires
//! these together; the integration tests drive them over loopback
//! sockets.

pub mod handler;
pub mod miner;
pub mod peer;
pub mod util;
