//! Progress engine: socket lifecycle and the glue that feeds the router.
mod backoff;
mod connection;
mod pipeline;
mod session;
mod types;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionManager, ConnectionSettings, WeakConnectionManager};
pub use pipeline::ProgressPipeline;
pub use session::{authorize_on_connect, SessionProvider, SessionTokens, StaticSessionProvider};
pub use types::{
    ConnectionError, ConnectionEvent, ConnectionEventKind, ConnectionState, DisconnectReason,
};
