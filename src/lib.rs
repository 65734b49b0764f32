pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod inspect;
pub mod media;
pub mod store;
pub mod validation;
