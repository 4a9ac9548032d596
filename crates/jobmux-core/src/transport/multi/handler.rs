//! Easy2 handler that collects the headers and body of one operation.

use std::str;

/// Collected response of one transfer. Implements curl's Handler for Easy2.
#[derive(Debug, Default)]
pub struct Collector {
    pub(super) header_lines: Vec<String>,
    pub(super) body: Vec<u8>,
    /// Abort the transfer once the body would exceed this many bytes.
    pub(super) max_body: Option<usize>,
    pub(super) truncated: bool,
}

impl Collector {
    pub(super) fn new(max_body: Option<usize>) -> Self {
        Self {
            max_body,
            ..Self::default()
        }
    }
}

impl curl::easy::Handler for Collector {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.header_lines.clear();
            }
            if !line.is_empty() {
                self.header_lines.push(line.to_string());
            }
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        if let Some(max) = self.max_body {
            if self.body.len() + data.len() > max {
                self.truncated = true;
                return Ok(0);
            }
        }
        self.body.extend_from_slice(data);
        Ok(data.len())
    }
}
