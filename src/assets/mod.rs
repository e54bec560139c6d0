//! Sound assets: fetching, decoding and the process-wide decoded cache.

pub mod cache;
pub mod decode;
pub mod fetch;

pub use cache::AssetCache;
pub use decode::{AudioBuffer, decode_audio};
pub use fetch::{AssetFetcher, FileFetcher, HttpFetcher, MockFetcher, fetcher_for_base};
