mod health_tests;
mod status_tests;
