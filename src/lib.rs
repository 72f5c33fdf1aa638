pub mod auth;
pub mod backup;
pub mod clock;
pub mod config;
pub mod db;
pub mod environment;
pub mod errors;
pub mod kv;
pub mod local;
pub mod mime_type;
pub mod normalization;
pub mod recorder;
pub mod recording;
pub mod session;
pub mod settings;
pub mod store;
pub mod sync;
pub mod urls;
