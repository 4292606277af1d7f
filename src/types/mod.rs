//! Public types for the Vedrfolnir API.

mod request;
mod response;

pub use request::GenerationRequest;
pub use response::{AiResponse, Usage};
