pub mod bootstrap;
pub mod feedport;
pub mod protocol;
pub mod stage;
