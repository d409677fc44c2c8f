//! Minimal browser-control port for the stepgate runtime.
//!
//! The surface is deliberately small: JS eval/call, layout metrics,
//! screenshot, mouse/keyboard/wheel dispatch, ready-state wait and the
//! current URL. Anything richer (element queries, accessibility trees)
//! belongs to the extension-produced snapshot, which keeps a CDP driver
//! and a Playwright driver behaviorally interchangeable behind the same
//! trait.

pub mod cdp;
pub mod errors;
pub mod keys;
pub mod mock;
pub mod port;

pub use cdp::{CdpBackend, CdpTransport, NoopTransport};
pub use errors::{BackendError, BackendErrorKind};
pub use mock::{MockBackend, MockCall};
pub use port::{Backend, LayoutMetrics, MouseButton, ReadyState};
