mod http;

pub use http::{send_push, SendPushRequest, SendPushResponse};
