//! Add-on discovery: reconstructs how files entered an image from the
//! shell commands and COPY/ADD instructions of a Dockerfile.

pub mod copy_add;
pub mod correlate;
pub mod discover;
pub mod handlers;
pub mod scope;
pub mod segment;
pub mod text;
pub mod verb;

pub use discover::{AddonDiscoverer, StageDiscovery};
pub use handlers::{HandlerContext, HandlerRegistry, OperationHandler, Outcome};
pub use scope::{substitute, VariableScope};
pub use segment::segment;
pub use verb::Verb;
