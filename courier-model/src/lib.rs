//! Data model shared by the Courier crates: the message item and its
//! store-assigned identifier.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod ids;
pub mod message;

pub use error::{ModelError, Result as ModelResult};
pub use ids::MessageId;
pub use message::Message;
