#![allow(dead_code)]

pub mod builders;
pub mod handlers;
pub mod strategies;

pub use builders::*;
pub use handlers::*;

use std::future::Future;
use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
