//! Page sources backed by real browsers.

pub mod chromiumoxide;
