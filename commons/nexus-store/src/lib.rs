pub mod error;
pub mod traits;

#[cfg(feature = "kube")]
pub mod k8s;

#[cfg(feature = "memory")]
pub mod memory;

pub use error::*;
pub use traits::*;

#[cfg(feature = "kube")]
pub use k8s::KubeObjectStore;
#[cfg(feature = "memory")]
pub use memory::MemoryObjectStore;
