//! Background LOD generation
//!
//! Mesh buffers are copied into a request, simplified on a worker thread
//! pool and handed back to the owning thread, which installs the generated
//! levels into the live mesh.

pub mod request;
pub mod work_queue;
pub mod worker;
pub mod injector;
pub mod generator;

pub use request::*;
pub use work_queue::*;
pub use worker::*;
pub use injector::*;
pub use generator::*;
