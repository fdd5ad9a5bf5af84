pub mod head;
pub mod state;

pub use head::{BlockLink, HeadWindow};
pub use state::ChainState;
