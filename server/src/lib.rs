//! Courier message delivery server library.
//! Routes point-to-point chat messages between users: connected recipients
//! get live pushes over their WebSocket, disconnected recipients get a
//! durable offline queue replayed at reconnect.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod presence;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
