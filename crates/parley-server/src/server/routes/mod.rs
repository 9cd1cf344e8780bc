// Route modules for Parley Server API
pub mod auth; // Registration and sign-in
pub mod messages; // Conversation history
pub mod websocket; // Session channel

use serde::{Deserialize, Serialize};

/// JSON error body shared by all routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
