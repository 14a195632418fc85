pub mod bus;
pub mod config;
pub mod correlator;
pub mod events;
pub mod pretty;
pub mod protocol;
pub mod transport;
