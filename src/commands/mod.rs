pub mod components;
pub mod maintenance;
pub mod steam;
