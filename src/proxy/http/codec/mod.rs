mod headers;
mod line;
mod request;
mod response;

pub(crate) use line::read_line;
pub(crate) use request::{RequestHead, read_request_head};
pub(crate) use response::{
    ResponseFraming, ResponseHead, encode_response_head, read_response_head,
};
