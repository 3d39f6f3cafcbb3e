//! Views (cameras) and the registry that holds the agreed set of them.

pub(crate) mod model;
pub(crate) mod registry;

pub use model::{Light, View, ViewParams};
pub use registry::{ViewRegistry, ViewSetChange};
