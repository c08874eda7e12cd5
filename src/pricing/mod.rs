pub mod catalog;
pub mod location;
pub mod models;
