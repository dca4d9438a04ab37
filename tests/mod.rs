mod common;

mod dispatch_tests;
mod health_tests;
mod idempotency_tests;
