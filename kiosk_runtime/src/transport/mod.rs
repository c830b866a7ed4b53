//! Serial link transport: the async-over-blocking bridge described in
//! §4.2/§5. Each peripheral gets a dedicated task owning its stream; callers
//! talk to it through an `mpsc` + `oneshot` request/response pair, the same
//! shape as the teacher's `TransportMessage`/`CcTalkTokioTransport`.

mod link;

pub use link::{spawn_link, LinkMessage, TokioSerialLink};
