//! vidshare - account and session backend for a media-sharing service
//!
//! Registration with avatar upload, password login, refresh-token rotation
//! and the access-token gate for protected routes.

pub mod account;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod server;
pub mod upload;
