pub mod bridge;
pub mod error;
pub mod opts;
pub mod watcher;

pub use bridge::{DeleteNotification, DeletedObject, PodDeleteBridge};
pub use error::K8sError;
