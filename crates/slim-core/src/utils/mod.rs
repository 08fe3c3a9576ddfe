pub mod completion;
pub mod retry;

pub use completion::{CompletionNotifier, CompletionSignal};
pub use retry::{with_retry, RetryBudget, RetryConfig};
