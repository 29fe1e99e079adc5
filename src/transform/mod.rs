//! Transforms which can be piped into a [`Stream`](crate::stream::Stream).
//!
//! Each of them is an opaque capability. Compilation, bundling and image
//! re-encoding are done in process, anything else is delegated to an external
//! program.

mod bundle;
#[cfg(feature = "images")]
mod images;
mod lint;
#[cfg(feature = "styles")]
mod styles;
mod tool;

pub use bundle::Bundle;
#[cfg(feature = "images")]
pub use images::Optimize;
pub use lint::{Lint, Report};
#[cfg(feature = "styles")]
pub use styles::Styles;
pub use tool::Tool;
