pub mod chains;
pub mod state_machine;
pub mod types;
