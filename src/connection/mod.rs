pub mod http;

/// One request/response exchange with an external endpoint.
pub trait SendMessage<Request, Response> {
    fn send(&self, data: Request) -> Response;
}
