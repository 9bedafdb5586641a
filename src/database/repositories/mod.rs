pub mod location;
pub mod memory;
