pub mod assign;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod net;
pub mod routes;
