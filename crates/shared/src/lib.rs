pub mod domain;
pub mod error;
pub mod policy;
pub mod protocol;
pub mod roster;
