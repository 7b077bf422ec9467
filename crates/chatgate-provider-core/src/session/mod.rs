mod pool;
mod token;

pub use pool::{SessionHandle, SessionPool};
pub use token::SharedToken;
