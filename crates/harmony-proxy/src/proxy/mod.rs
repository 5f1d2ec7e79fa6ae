//! OpenAI-compatible proxy in front of a harmony-format upstream

mod error;
mod server;
mod session;
mod streaming;
mod upstream;

pub use error::{ProxyError, error_response};
pub use server::{AppState, ProxyServer, create_router};
pub use session::{ChatSession, rewrite_completion};
pub use streaming::{
    DONE_FRAME, LineBuffer, LineOutcome, SkipReason, SseLine, StreamPhase, StreamRewriter, pump,
    spawn_rewrite_stream, sse_frame,
};
pub use upstream::{UpstreamClient, UpstreamEndpoint, UpstreamReply};
