pub mod attempt;
pub mod question;
pub mod quiz;
pub mod webhook_log;
