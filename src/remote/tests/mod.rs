//! Unit tests for the remote module.

mod args;
