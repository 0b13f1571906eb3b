//! Interfaces to the host environment.
//!
//! The core never talks to a window or the file system itself. Whatever host
//! embeds the core (the desktop frontend, a test) implements these traits.

/// Something that can show a finished frame to the user.
pub trait Display {
    /// Called once per V-blank with the finished frame: `SCREEN_WIDTH *
    /// SCREEN_HEIGHT` fully opaque ARGB8888 pixels in row-major order.
    fn present(&mut self, frame: &[u32]);
}

/// A display that throws every frame away. Useful for tests and headless
/// runs.
pub struct NullDisplay;

impl Display for NullDisplay {
    fn present(&mut self, _: &[u32]) {}
}
