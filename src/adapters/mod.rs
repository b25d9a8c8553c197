// Adapters layer: concrete implementations for external systems (http server, http client, storage).

pub mod client;
pub mod http;
pub mod storage;
