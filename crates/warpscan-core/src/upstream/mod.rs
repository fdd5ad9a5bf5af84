//! Upstream access: endpoint pool, transports and the request dispatcher.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::execute(RpcRequest)
//!   ├─ EndpointPool::select_excluding(tried)   health ranking + token bucket
//!   ├─ Transport::call(endpoint, request)      one attempt, bounded timeout
//!   └─ EndpointPool::report_success/failure    single writer of endpoint state
//! ```

pub mod dispatcher;
pub mod endpoint;
pub mod errors;
pub mod http_client;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod pool;
pub mod request;
pub mod token_bucket;
pub mod transport;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStatsSnapshot};
pub use endpoint::{Endpoint, EndpointConfig, EndpointId, EndpointSnapshot};
pub use errors::{ErrorClass, RpcErrorCategory, UpstreamError};
pub use http_client::HttpTransport;
pub use pool::{EndpointPool, FailureKind, PoolConfig, SelectError};
pub use request::RpcRequest;
pub use transport::Transport;
