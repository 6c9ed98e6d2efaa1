//! A minimal SMTP client: plain or STARTTLS-upgraded connections, command
//! round-trips and multi-line response parsing.

mod connection;
mod response;
mod smtp_client;

pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
