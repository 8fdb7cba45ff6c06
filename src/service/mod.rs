pub mod report_service;
pub mod turn_service;
