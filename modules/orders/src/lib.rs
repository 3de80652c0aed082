pub mod config;
pub mod db;
pub mod health;
pub mod models;
pub mod outbox;
pub mod repos;
pub mod routes;
pub mod services;
