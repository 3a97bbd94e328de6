/// Check command functionality
pub mod check;
/// Health command functionality
pub mod health;
/// Config command functionality
pub mod show_config;
