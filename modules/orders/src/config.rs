use std::env;
use std::time::Duration;

use crate::outbox::{ORDER_CREATED, ORDER_DEACTIVATED, ORDER_UPDATED};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Result<Self, String> {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => Ok(BusType::Nats),
            "inmemory" => Ok(BusType::InMemory),
            other => Err(format!("Invalid BUS_TYPE: {other}. Must be 'inmemory' or 'nats'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreType {
    Postgres,
    InMemory,
}

impl StoreType {
    pub fn from_env() -> Result<Self, String> {
        match env::var("STORE_TYPE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => Ok(StoreType::Postgres),
            "inmemory" => Ok(StoreType::InMemory),
            other => Err(format!(
                "Invalid STORE_TYPE: {other}. Must be 'postgres' or 'inmemory'"
            )),
        }
    }
}

/// Static event type -> broker destination binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub event_type: &'static str,
    pub destination: String,
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub store_type: StoreType,
    pub database_url: Option<String>,
    pub bus_type: BusType,
    pub nats_url: String,
    pub nats_stream: String,
    pub host: String,
    pub port: u16,
    pub outbox_batch_size: i64,
    pub outbox_poll_interval: Duration,
    pub routes: Vec<RouteConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let store_type = StoreType::from_env()?;
        let database_url = env::var("DATABASE_URL").ok();
        if store_type == StoreType::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_TYPE=postgres".to_string());
        }

        let bus_type = BusType::from_env()?;

        let nats_url = env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let nats_stream = env::var("NATS_STREAM").unwrap_or_else(|_| "ORDERS".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let outbox_batch_size: i64 = env::var("OUTBOX_BATCH_SIZE")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .map_err(|_| "OUTBOX_BATCH_SIZE must be an integer".to_string())?;
        if outbox_batch_size < 1 {
            return Err("OUTBOX_BATCH_SIZE must be at least 1".to_string());
        }

        let poll_secs: u64 = env::var("OUTBOX_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| "OUTBOX_POLL_INTERVAL_SECS must be an integer".to_string())?;
        if poll_secs == 0 {
            return Err("OUTBOX_POLL_INTERVAL_SECS must be at least 1".to_string());
        }

        let routes = vec![
            route_from_env(ORDER_CREATED, "ORDER_CREATED_DESTINATION", "orders.order_created")?,
            route_from_env(ORDER_UPDATED, "ORDER_UPDATED_DESTINATION", "orders.order_updated")?,
            route_from_env(
                ORDER_DEACTIVATED,
                "ORDER_DEACTIVATED_DESTINATION",
                "orders.order_deactivated",
            )?,
        ];

        Ok(Config {
            store_type,
            database_url,
            bus_type,
            nats_url,
            nats_stream,
            host,
            port,
            outbox_batch_size,
            outbox_poll_interval: Duration::from_secs(poll_secs),
            routes,
        })
    }

    /// All configured destinations, in route order
    pub fn destinations(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.destination.clone()).collect()
    }
}

fn route_from_env(
    event_type: &'static str,
    var: &str,
    default: &str,
) -> Result<RouteConfig, String> {
    let destination = env::var(var).unwrap_or_else(|_| default.to_string());
    if destination.trim().is_empty() {
        return Err(format!("{var} cannot be empty"));
    }
    Ok(RouteConfig {
        event_type,
        destination,
    })
}
