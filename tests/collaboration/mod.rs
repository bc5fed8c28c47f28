mod client_tests;
mod lock_tests;
mod presence_tests;
mod relay_tests;
