use crate::model::{TerminalSize, Theme};

/// Screen buffer that renders the remote byte stream. The session core only
/// writes bytes into it, resizes it and hands it focus.
pub trait Emulator {
    fn write(&mut self, bytes: &[u8]);
    fn resize(&mut self, size: TerminalSize);
    fn focus(&mut self);
    fn set_theme(&mut self, theme: Theme);
}

pub struct Vt100Emulator {
    parser: vt100::Parser,
    theme: Theme,
    focused: bool,
}

impl Vt100Emulator {
    pub fn new(size: TerminalSize, scrollback: usize, theme: Theme) -> Self {
        Self {
            parser: vt100::Parser::new(size.rows, size.cols, scrollback),
            theme,
            focused: false,
        }
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    pub fn size(&self) -> TerminalSize {
        let (rows, cols) = self.parser.screen().size();
        TerminalSize { cols, rows }
    }

    /// Whether the remote switched arrow keys to application mode (DECCKM).
    pub fn application_cursor(&self) -> bool {
        self.parser.screen().application_cursor()
    }

    pub fn bracketed_paste(&self) -> bool {
        self.parser.screen().bracketed_paste()
    }
}

impl Emulator for Vt100Emulator {
    fn write(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    fn resize(&mut self, size: TerminalSize) {
        if self.size() == size {
            return;
        }
        self.parser.screen_mut().set_size(size.rows, size.cols);
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }
}
