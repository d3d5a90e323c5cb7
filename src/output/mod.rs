use crate::error::{OutputError, Result};
use crate::event::TraceEvent;
use std::fs::File;
use std::path::Path;

pub mod jsonl;
pub mod terminal;

/// Destination for trace events. Sinks own all formatting.
pub trait OutputSink: Send {
    fn emit(&mut self, event: &TraceEvent) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

pub struct OutputManager {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl OutputManager {
    /// JSONL always goes somewhere: `jsonl_path` if given, stdout otherwise.
    /// The terminal view is added on stderr when JSONL goes to a file or
    /// when running verbose.
    pub fn new(jsonl_path: Option<&Path>, no_color: bool, verbosity: u8) -> Result<Self> {
        let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();

        match jsonl_path {
            Some(path) => {
                let file = File::create(path).map_err(OutputError::Io)?;
                sinks.push(Box::new(jsonl::JsonlSink::new_file(file)));
            }
            None => sinks.push(Box::new(jsonl::JsonlSink::new_stdout())),
        }

        if jsonl_path.is_some() || verbosity > 0 {
            sinks.push(Box::new(terminal::TerminalSink::new(no_color)));
        }

        Ok(Self { sinks })
    }

    pub fn with_sinks(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn emit_event(&mut self, event: TraceEvent) -> Result<()> {
        for sink in &mut self.sinks {
            sink.emit(&event)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}
