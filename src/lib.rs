//! Iris gateway: HTTP/WebSocket bridge for chat automation.

pub mod broadcast;
pub mod config;
pub mod decrypt;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod observer;
pub mod store;
