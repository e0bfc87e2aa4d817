//! Bank account service: user account lifecycle and ledger lookups
//!
//! Registration, activation, password reset and user administration live in
//! [`service::AccountService`]; [`routes::create_router`] exposes them over HTTP.

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod security;
pub mod service;
pub mod state;
pub mod validation;

pub use state::AppState;
