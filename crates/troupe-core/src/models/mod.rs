pub mod conversation;
pub mod delegation;
pub mod message;
pub mod worker;

pub use conversation::*;
pub use delegation::*;
pub use message::*;
pub use worker::*;
