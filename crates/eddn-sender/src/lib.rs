pub mod backoff;
pub mod endpoint;
pub mod mock;
pub mod sender;
mod worker;

pub use backoff::RetryPolicy;
pub use endpoint::{Endpoint, HttpEndpoint};
pub use mock::MockEndpoint;
pub use sender::{Sender, SenderStats, SubmitError};
