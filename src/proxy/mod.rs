pub mod handlers;
pub mod mappers;
pub mod middleware;
pub mod server;
pub mod token_manager;
pub mod upstream;
pub mod usage;
