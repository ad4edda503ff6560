pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::attempt_service::AttemptService;

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(attempt_service: AttemptService, jwt_secret: impl Into<String>) -> Self {
        Self {
            attempt_service,
            jwt_secret: jwt_secret.into(),
        }
    }
}
