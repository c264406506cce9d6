//! Remote image resolution: fetching, signature sniffing and storage.

pub mod drive;
pub mod http;
pub mod resolver;
pub mod sniff;
pub mod store;

pub use http::{FetchError, FetchedBody, HttpFetch, ReqwestFetcher};
pub use resolver::{AssetFailure, AssetResolver, ResolvedAsset};
pub use sniff::ImageFormat;
pub use store::{ContentStore, LocalContentStore};
