pub mod creature;
pub mod equipment;
pub mod item;
