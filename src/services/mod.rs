pub mod ai_client;
pub mod materializer;
pub mod password_check;
pub mod scheduler;
