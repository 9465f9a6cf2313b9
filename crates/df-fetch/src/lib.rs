//! Fetch engine for the DOM emulator: request policy, caching, CORS,
//! redirects and body decoding over pluggable blocking and async transports.

pub mod console;
pub mod cors;
pub mod data_url;
pub mod engine;
pub mod headers;
pub mod interceptor;
mod pipeline;
pub mod redirect;
pub mod request;
pub mod settings;
pub mod transport;
pub mod virtual_path;

pub use console::Console;
pub use console::LogConsole;
pub use data_url::DataUrl;
pub use data_url::DataUrlDecoder;
pub use data_url::Rfc2397Decoder;
pub use df_core::ErrorKind;
pub use df_core::FetchError;
pub use df_core::FetchResult;
pub use df_net::Response;
pub use engine::FetchEngine;
pub use engine::FetchEngineBuilder;
pub use interceptor::Interceptor;
pub use interceptor::NoopInterceptor;
pub use request::AbortController;
pub use request::AbortSignal;
pub use request::CredentialsMode;
pub use request::RedirectMode;
pub use request::ReferrerPolicy;
pub use request::Request;
pub use request::RequestBuilder;
pub use request::RequestMode;
pub use request::StreamBody;
pub use settings::BrowsingContext;
pub use settings::FetchSettings;
pub use settings::RequestHeaderRule;
pub use transport::AsyncTransport;
pub use transport::BlockingTransport;
pub use virtual_path::VirtualPathResolver;
pub use virtual_path::VirtualServerMap;
