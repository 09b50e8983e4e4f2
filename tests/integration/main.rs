//! HTTP-level integration tests for the Livebase server.

mod helpers;

mod health_test;
mod realtime_test;
