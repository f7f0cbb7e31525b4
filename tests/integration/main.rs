//! Integration tests for geo-harvester
//!
//! These drive the real reqwest-backed fetch session against wiremock
//! listings and check what ends up in storage.

mod crawl_tests;
