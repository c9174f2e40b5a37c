//! Real-time collaboration core for a Kanban project tracker.
//!
//! Boards, columns and tasks with dense ordering, project membership and
//! invitations, and a websocket layer that keeps everyone viewing a project
//! in sync through presence updates and persisted board/member events.

pub mod config;
pub mod db;
pub mod protocol;
pub mod routes;
pub mod services;
pub mod state;
