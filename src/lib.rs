//! Library crate for tandem-grid: the tic-tac-toe rules, the relay server
//! (store, bus and REST surface) and the client core used by each player.

pub mod client;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
