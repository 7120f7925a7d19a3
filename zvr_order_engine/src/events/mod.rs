mod channel;
mod event_types;
mod hooks;

pub use channel::{EventDispatcher, EventPublisher};
pub use event_types::*;
pub use hooks::{BoxedFuture, EventHandlers, EventHooks, EventProducers, Handler};
