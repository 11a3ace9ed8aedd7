//! Abstraction for spawning job execution on a runtime.

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable unit future.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Spawns detached futures.
pub trait Spawn: Send + Sync + 'static {
    /// Spawn an async task.
    fn spawn(&self, fut: BoxedTask);
}
