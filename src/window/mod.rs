//! Collection windows
//!
//! Each market gets one market window spanning its trading life and zero or
//! more shock windows around large price moves. Social records are retained
//! only when their timestamp falls inside one of these windows.

mod calculator;
mod types;

pub use calculator::WindowCalculator;
pub use types::{CollectionWindow, MarketWindows, WindowError, WindowKind, WindowParams};
