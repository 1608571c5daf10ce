//! Background folder preloading

pub mod preloader;

pub use preloader::{PreloadEvent, PreloadItem, PreloadStats, Preloader};
