use std::io::{self, BufWriter, Write};

use crate::error::{OutputError, Result};
use crate::event::TraceEvent;
use super::OutputSink;

/// JSONL output sink - one JSON object per line.
pub struct JsonlSink {
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl JsonlSink {
    pub fn new_file(file: std::fs::File) -> Self {
        Self::new(Box::new(file))
    }

    pub fn new_stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

impl OutputSink for JsonlSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event).map_err(OutputError::Serialize)?;
        self.writer.write_all(b"\n").map_err(OutputError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(OutputError::Io)?;
        Ok(())
    }
}
