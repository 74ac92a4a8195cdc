pub mod conversation_store;
pub mod delegation_store;
pub mod message_store;
pub mod worker_store;

pub use conversation_store::ConversationStore;
pub use delegation_store::DelegationStore;
pub use message_store::MessageStore;
pub use worker_store::WorkerStore;
