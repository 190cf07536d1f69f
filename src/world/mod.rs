pub mod decay;
pub mod holder;
pub mod hooks;
pub mod item_types;
pub mod map;
pub mod movement;
pub mod outcome;
pub mod position;
pub mod state;
pub mod transfer;
