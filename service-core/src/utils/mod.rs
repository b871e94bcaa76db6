pub mod retry;

pub use retry::{Backoff, RetryPolicy, Retryable, TimeoutError, with_retry, with_timeout};
