// Adapters layer: concrete transports for reaching upstream providers.

pub mod curl;
pub mod native;

pub use curl::CurlTransport;
pub use native::NativeTransport;
