//! Streaming protocol between the session and remote viewers.
//!
//! Binary frames carry raw terminal bytes in both directions. Text frames
//! carry [`ControlFrame`]s. Output is fanned out through [`ViewerHub`] into
//! one bounded queue per viewer, and each viewer's writer drains its queue
//! through a [`Coalescer`].

mod coalesce;
mod frame;
mod hub;

pub use coalesce::{Coalescer, Flush};
pub use frame::{ControlFrame, TunnelNotice};
pub use hub::{close_code, Attachment, Outbound, ViewerHub, ViewerId};
