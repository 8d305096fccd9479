//! C5 (Fast Downloader) and C6 (Slow Downloader + Hint Queue), spec §4.5–§4.6.

pub mod fast;
pub mod slow;

pub use fast::FastDownloader;
pub use slow::{store_new_edition_hint, SlowDownloader};
