pub mod codec;
pub mod ids;
pub mod messages;
pub mod schedule;
pub mod state;
pub mod types;
