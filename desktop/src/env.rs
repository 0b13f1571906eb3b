use advanboi::{SCREEN_WIDTH, SCREEN_HEIGHT, env::Display};


/// The emulator-facing side of the window: stores the most recent finished
/// frame in the format `minifb` wants to blit.
pub(crate) struct WindowDisplay {
    buffer: Vec<u32>,
}

impl WindowDisplay {
    pub(crate) fn new() -> Self {
        Self {
            buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }

    /// The last presented frame.
    pub(crate) fn buffer(&self) -> &[u32] {
        &self.buffer
    }
}

impl Display for WindowDisplay {
    fn present(&mut self, frame: &[u32]) {
        self.buffer.copy_from_slice(frame);
    }
}
