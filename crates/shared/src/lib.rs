pub mod domain;
pub mod error;
pub mod order;
pub mod protocol;
