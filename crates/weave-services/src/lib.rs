pub mod http;
pub mod registry;
pub mod selector;

pub use http::HttpServiceClient;
pub use registry::{ServiceRegistry, Snapshot};
pub use selector::select;
