//! Migrates community-server content (roles, channels, message history) from
//! a Discord-style source to a Stoat destination over each platform's HTTP
//! API, preserving authorship, attachments, and reply/forward relationships
//! the destination cannot model natively.
pub mod clone;
pub mod config;
pub mod format;
pub mod migrate;
pub mod model;
pub mod relay;
pub mod report;
pub mod source;
pub mod stoat;
