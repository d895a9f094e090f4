// Chronicle - Collaborative Timeline Coordination Core

pub mod convergent;
pub mod session;
pub mod timeline;
pub mod transport;
