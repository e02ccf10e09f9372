pub mod facade;
pub mod http_client;

pub use facade::ServiceFacade;
pub use http_client::HttpClientError;
pub use http_client::RequestDescriptor;
pub use http_client::SecureHttpClient;
