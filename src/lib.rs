pub mod admin;
pub mod export;
pub mod filters;
pub mod gateway;
pub mod import;
pub mod listing;
pub mod media;
pub mod models;
pub mod session;
pub mod settings;
