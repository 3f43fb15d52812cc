pub mod authority;
pub mod org;
pub mod workflow;
