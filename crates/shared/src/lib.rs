pub mod domain;
pub mod error;
pub mod identity;
pub mod protocol;
