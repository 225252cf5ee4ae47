#![forbid(unsafe_code)]

//! Route `tracing` output to the browser console.
//!
//! A `tracing_subscriber::fmt` layer formats each event into a
//! [`LineWriter`]; when the writer drops, the finished line goes to a
//! [`ConsoleSink`] at the event's level, so warnings land in
//! `console.warn` and so on.

use std::io;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

/// Console method an event is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&Level> for ConsoleLevel {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }
}

/// Destination for finished log lines.
pub trait ConsoleSink {
    fn emit(&self, level: ConsoleLevel, line: &str);
}

/// Buffers one formatted event and emits it on drop.
#[derive(Debug)]
pub struct LineWriter<S: ConsoleSink> {
    sink: S,
    level: ConsoleLevel,
    buf: Vec<u8>,
}

impl<S: ConsoleSink> io::Write for LineWriter<S> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: ConsoleSink> Drop for LineWriter<S> {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let line = text.trim_end();
        if !line.is_empty() {
            self.sink.emit(self.level, line);
        }
    }
}

/// [`MakeWriter`] producing one [`LineWriter`] per event.
#[derive(Debug, Clone)]
pub struct ConsoleMakeWriter<S> {
    sink: S,
}

impl<S: ConsoleSink + Clone> ConsoleMakeWriter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<'a, S: ConsoleSink + Clone + 'a> MakeWriter<'a> for ConsoleMakeWriter<S> {
    type Writer = LineWriter<S>;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            sink: self.sink.clone(),
            level: ConsoleLevel::Info,
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LineWriter {
            sink: self.sink.clone(),
            level: meta.level().into(),
            buf: Vec::new(),
        }
    }
}

/// `console.*` sink.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserConsole;

#[cfg(target_arch = "wasm32")]
impl ConsoleSink for BrowserConsole {
    fn emit(&self, level: ConsoleLevel, line: &str) {
        use wasm_bindgen::JsValue;
        use web_sys::console;

        let value = JsValue::from_str(line);
        match level {
            ConsoleLevel::Debug => console::debug_1(&value),
            ConsoleLevel::Info => console::info_1(&value),
            ConsoleLevel::Warn => console::warn_1(&value),
            ConsoleLevel::Error => console::error_1(&value),
        }
    }
}

/// Install the console subscriber with an `EnvFilter` directive string
/// (e.g. `"infigrid_web=debug,infigrid_core=info"`).
///
/// Returns `false` if the filter does not parse or a global subscriber is
/// already installed. Output is JSON with the `tracing-json` feature.
#[cfg(target_arch = "wasm32")]
pub fn init_console_logging(filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let Ok(filter) = EnvFilter::try_new(filter) else {
        return false;
    };
    let builder = tracing_subscriber::fmt()
        .with_writer(ConsoleMakeWriter::new(BrowserConsole))
        .without_time()
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(filter);
    if cfg!(feature = "tracing-json") {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    struct Recording(Arc<Mutex<Vec<(ConsoleLevel, String)>>>);

    impl Recording {
        fn lines(&self) -> Vec<(ConsoleLevel, String)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ConsoleSink for Recording {
        fn emit(&self, level: ConsoleLevel, line: &str) {
            self.0.lock().unwrap().push((level, line.to_owned()));
        }
    }

    #[test]
    fn events_are_routed_by_level() {
        let sink = Recording::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(ConsoleMakeWriter::new(sink.clone()))
            .without_time()
            .with_ansi(false)
            .with_max_level(Level::DEBUG)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(tiles = 3, "slow frame");
            tracing::debug!("tick");
            tracing::trace!("filtered out");
        });

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, ConsoleLevel::Warn);
        assert!(lines[0].1.contains("slow frame"));
        assert!(lines[0].1.contains("tiles=3"));
        assert!(!lines[0].1.ends_with('\n'));
        assert_eq!(lines[1].0, ConsoleLevel::Debug);
    }

    #[test]
    fn empty_writes_emit_nothing() {
        let sink = Recording::default();
        drop(ConsoleMakeWriter::new(sink.clone()).make_writer());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn level_mapping() {
        assert_eq!(ConsoleLevel::from(&Level::ERROR), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from(&Level::TRACE), ConsoleLevel::Debug);
    }
}
