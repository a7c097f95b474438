pub mod channel;
pub mod chunk;
pub mod conversation;
pub mod source;
pub mod workspace;
