pub mod prune;
pub mod stage;
pub mod status;
