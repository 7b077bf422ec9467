//! Client-facing HTTP surface: chat-completion compatible routes on top of
//! the [`chatgate_core::Dispatcher`].

mod models;
mod proxy;

pub use models::ModelTable;
pub use proxy::{ProxySettings, ProxyState, proxy_router};
