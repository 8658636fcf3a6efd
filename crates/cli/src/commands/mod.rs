pub mod agent;
pub mod offline;
