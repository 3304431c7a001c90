//! Lloyd George record storage: the document reference API, the staged upload
//! finaliser and the bulk upload worker share everything in this crate.

pub mod auth;
pub mod config;
pub mod db_utils;
pub mod error;
pub mod events;
pub mod handlers;
pub mod http;
pub mod models;
pub mod router;
pub mod services;
pub mod stores;
pub mod validation;

#[cfg(test)]
pub mod testing;
