//! Integration tests for the speech cache pipeline.

mod mock_server;
mod pipeline;
mod preload;
mod remote_tier;
mod transport;
