pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod permissions;
pub mod proc;
pub mod routes;
pub mod s3;
pub mod scan;
pub mod schema;
pub mod state;
pub mod storage;
pub mod workers;

pub use routes::create_router;
pub use state::{AppState, Collaborators};
pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
