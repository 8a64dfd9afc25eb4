pub mod connection;
pub mod slug;
pub mod upload;
