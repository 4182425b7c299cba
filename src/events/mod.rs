//! Internal event bus: the closed [`Event`] set and the worker-pool dispatcher.

mod dispatch;
mod event;

pub use dispatch::{DispatchError, EventDispatcher, EventHandler, handler_fn};
pub use event::{Event, EventKind};
