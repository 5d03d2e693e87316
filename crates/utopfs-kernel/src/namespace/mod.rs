//! The mount's visible namespace: reserved-name classification, the
//! synthetic control subtree, and the dispatcher that routes between them
//! and the backing store.

mod classify;
mod control;
mod dispatch;

pub use classify::{PathClassification, RESERVED_NAME, classify, classify_listing, normalize};
pub use control::{
    CONTROL_ENTRIES, ControlContext, ControlEntry, ControlProvider, pin_process_start, process_start,
    version_string,
};
pub use dispatch::Dispatcher;
