//! Local implementations for `paperdeck`.
//!
//! The processing core (`html`, `context`) is synchronous and side-effect
//! free: each call owns its parsed tree and produces a new result, so the
//! surrounding service may run invocations concurrently without any shared
//! state. The only async points are the network collaborators (`arxiv`,
//! `chat`); the filesystem stores (`threads`, `prefs`, `keys`) are plain
//! `std::fs`.

pub mod arxiv;
pub mod chat;
pub mod context;
pub mod html;
pub mod keys;
pub mod prefs;
pub mod textprep;
pub mod threads;
