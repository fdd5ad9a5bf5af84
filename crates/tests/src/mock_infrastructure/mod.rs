//! Mock infrastructure for exercising warpscan-core over real HTTP.
//!
//! - `RpcMockBuilder`: mockito-backed JSON-RPC node
//! - `ExplorerMockBuilder`: mockito-backed block-explorer REST service
//! - helpers building [`warpscan_core::config::AppConfig`] around mock URLs
//!
//! ```ignore
//! let mut node = RpcMockBuilder::new().await;
//! node.mock_get_block_by_number(100, &BlockResponseBuilder::new(100).build());
//! let ctx = CoreContext::from_config(config_for(&[node.url()])).await?;
//! ```

pub mod explorer_mock;
pub mod rpc_mock;
pub mod test_helpers;

pub use explorer_mock::{verified_contract, ExplorerMockBuilder};
pub use rpc_mock::{transaction_response, BlockResponseBuilder, RpcMockBuilder};
pub use test_helpers::*;
