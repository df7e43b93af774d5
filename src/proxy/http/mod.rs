mod body;
mod codec;
mod pipeline;
mod respond;
mod server;

pub use body::{BodyPlan, BodyStream, OriginBody};
pub(crate) use codec::{ResponseHead, read_response_head};
pub use server::handle_http;
