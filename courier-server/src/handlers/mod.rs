pub mod messages;
pub mod stats;
