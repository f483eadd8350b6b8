//! Asynchronous image loading for scrolling galleries.
//!
//! Load requests are queued, admitted into a fixed worker pool in FIFO or LIFO order, decoded
//! at a size bounded by their destination, cached by resource identity, and handed back to a
//! single consumer that drops results whose destination has since been reassigned.

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod loader;
pub mod scanner;

pub use cache::ImageCache;
pub use config::LoaderConfig;
pub use decode::{DecodedImage, ImageDecoder, SampledDecoder, SizeHints, TargetSize};
pub use error::LoadError;
pub use loader::{
    Deliveries, DeliveryOutcome, Destination, ImageLoader, ImageLoaderBuilder, LoaderCell,
    LoaderStats, OrderPolicy,
};
