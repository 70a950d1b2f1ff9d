//! Functional tests: worker, HTTP API and full request/reply round trips

mod rehost_test;
mod support;
mod worker_test;
