//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.
//!
//! `presence` and `room` are the in-memory halves of the coordinator;
//! `collab` drives them for socket connections. `events` is the only path
//! from a committed mutation to a broadcast.

pub mod auth;
pub mod board;
pub mod collab;
pub mod events;
pub mod invitation;
pub mod membership;
pub mod notification;
pub mod ordering;
pub mod presence;
pub mod room;
