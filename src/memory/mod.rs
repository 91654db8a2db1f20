pub mod history;
pub mod maintenance;
pub mod manager;
pub mod persistent;
pub mod search;
pub mod stats;
pub mod types;
pub mod working;
