mod application;
mod loader;

/// The page size the server receives when the caller does not choose one.
pub const LIST_PAGE_SIZE_DEFAULT: i64 = 100;

/// A page size that leaves paging to the server.
/// Listing with this page size issues a single request.
pub const LIST_PAGE_SIZE_SERVER_DEFINED: i64 = -1;

pub use application::*;
pub use loader::*;
