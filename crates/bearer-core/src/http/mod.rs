mod dispatcher;

pub use dispatcher::{RequestDescriptor, RequestDispatcher};
pub use reqwest::{Method, StatusCode};
