pub mod blocking;
pub mod classify;
pub mod client;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod listing;
pub mod options;
pub mod publish;
pub mod rpc;
pub mod table;
pub mod ticket;
pub mod transport;
pub mod validation;

pub use blocking::BlockingClient;
pub use client::Client;
pub use error::{ClientError, ClientResult};
