//! JSON-lines reading recorder.
//!
//! Appends one [`ReadingRecord`] per completed cycle to any writer, for a
//! persistence collaborator to pick up.  Other events are ignored.

use std::io::Write;

use log::warn;

use crate::app::events::{AppEvent, ReadingRecord};
use crate::app::ports::EventSink;

pub struct JsonLinesRecorder<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> JsonLinesRecorder<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, record: &ReadingRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> EventSink for JsonLinesRecorder<W> {
    fn emit(&mut self, event: &AppEvent) {
        if let AppEvent::Cycle(report) = event {
            match self.write(&report.record()) {
                Ok(()) => self.written += 1,
                Err(e) => warn!("recorder: cannot write reading: {e}"),
            }
        }
    }
}
