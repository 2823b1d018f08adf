//! Server-side watch state: the registry of active watchers and the event
//! sources that feed it.

mod event_source;
mod registry;

pub use event_source::*;
pub use registry::*;
