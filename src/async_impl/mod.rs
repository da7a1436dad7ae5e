pub use self::body::Body;
pub use self::client::{Client, ClientBuilder, Pending};
pub use self::request::{Request, RequestBuilder};
pub use self::response::{Response, ResponseUrl};

pub mod body;
pub mod client;
pub(crate) mod request;
mod response;
