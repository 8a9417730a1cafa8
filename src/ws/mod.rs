pub mod handler;
pub mod protocol;
