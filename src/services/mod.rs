pub mod attempt_service;
pub mod grading_service;
pub mod notification_service;
pub mod timer_service;
