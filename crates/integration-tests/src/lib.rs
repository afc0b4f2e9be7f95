//! Integration tests for the gateway pipelines live in `tests/`.
