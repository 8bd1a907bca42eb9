pub mod db;
pub mod notifications;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod services;
pub mod version;
