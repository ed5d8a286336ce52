pub mod db;
pub mod error;
pub mod grocery;
pub mod models;
pub mod service;
