use colored::Colorize;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Red/green formatting for status lines, disabled when not writing to a TTY.
#[derive(Debug, Clone, Copy)]
pub struct ColorScheme {
    enabled: bool,
}

impl ColorScheme {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn red(&self, s: &str) -> String {
        if self.enabled {
            s.red().to_string()
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        if self.enabled {
            s.green().to_string()
        } else {
            s.to_string()
        }
    }
}

/// Output collaborator for user-facing status lines.
///
/// Verification narrates progress and failures through a Handler so that the
/// error values themselves stay clean for control flow. Verbose lines are
/// mirrored to `log::debug!` so library users get them without a handler
/// wired to a terminal.
#[derive(Clone)]
pub struct Handler {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    pub color_scheme: ColorScheme,
    verbose: bool,
}

impl Handler {
    pub fn new(out: Box<dyn Write + Send>, color: bool, verbose: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            color_scheme: ColorScheme::new(color),
            verbose,
        }
    }

    /// Handler writing to stderr without color, for non-interactive use.
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()), false, false)
    }

    /// Handler capturing output in a shared buffer, for tests.
    pub fn buffered() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = SharedBuf(Arc::clone(&buf));
        (Self::new(Box::new(sink), false, true), buf)
    }

    pub fn println(&self, msg: &str) {
        self.write(&format!("{}\n", msg));
    }

    pub fn printf(&self, msg: &str) {
        self.write(msg);
    }

    pub fn verbose_println(&self, msg: &str) {
        log::debug!("{}", msg);
        if self.verbose {
            self.write(&format!("{}\n", msg));
        }
    }

    fn write(&self, s: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(s.as_bytes());
        }
    }
}

struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
