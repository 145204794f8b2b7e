//! Hop gateway: HTTP front end for remote Docker hosts behind a bastion

pub mod api;
pub mod config;
