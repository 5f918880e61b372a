//! # Output Capture
//!
//! Per-task bounded stdout/stderr ring buffer. Chunks are split at
//! newline boundaries; a trailing partial line is buffered, not
//! flushed, until either a newline arrives or the caller calls
//! [`OutputCapture::finish`] for that task.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::domain::{CapturedOutput, StreamKind};
use crate::ids::TaskId;

#[derive(Debug, Clone)]
struct Line {
    content: String,
    bytes: u64,
}

impl Line {
    fn new(content: String) -> Self {
        let bytes = content.len() as u64;
        Self { content, bytes }
    }

    fn drop_marker(count: usize) -> Self {
        Self::new(format!("... {count} lines dropped"))
    }
}

#[derive(Default)]
struct TaskBuffer {
    stdout: VecDeque<Line>,
    stderr: VecDeque<Line>,
    /// Unterminated tail of the most recent chunk per stream, held
    /// back until a newline or `finish()` flushes it.
    pending_stdout: String,
    pending_stderr: String,
    total_size: u64,
    /// Number of consecutive lines dropped since the last drop marker,
    /// used to coalesce a whole run of drops into one marker.
    drop_run: usize,
}

impl TaskBuffer {
    fn stream_mut(&mut self, stream: StreamKind) -> &mut VecDeque<Line> {
        match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    fn pending_mut(&mut self, stream: StreamKind) -> &mut String {
        match stream {
            StreamKind::Stdout => &mut self.pending_stdout,
            StreamKind::Stderr => &mut self.pending_stderr,
        }
    }
}

/// Per-task bounded stdout/stderr capture with FIFO eviction on
/// overflow.
pub struct OutputCapture {
    buffers: DashMap<TaskId, TaskBuffer>,
    max_buffer_bytes: u64,
}

impl OutputCapture {
    #[must_use]
    pub fn new(max_buffer_bytes: u64) -> Self {
        Self {
            buffers: DashMap::new(),
            max_buffer_bytes,
        }
    }

    /// Splits `chunk` at newline boundaries and appends complete lines
    /// to `stream`'s buffer, evicting the oldest lines (across both
    /// streams combined, since `totalSize` spans both) if the task's
    /// cap would be exceeded.
    pub fn capture(&self, task_id: &TaskId, stream: StreamKind, chunk: &str) {
        let mut buf = self.buffers.entry(task_id.clone()).or_default();

        let pending = std::mem::take(buf.pending_mut(stream));
        let mut combined = pending;
        combined.push_str(chunk);

        let mut lines: Vec<String> = combined.split('\n').map(str::to_owned).collect();
        // The last element is either "" (chunk ended on a newline) or
        // an incomplete tail to keep pending.
        let tail = lines.pop().unwrap_or_default();
        *buf.pending_mut(stream) = tail;

        for line in lines {
            self.push_line(&mut buf, stream, line);
        }
    }

    /// Flushes any buffered partial line for `task_id` as a final
    /// line. Call once the task has terminated.
    pub fn finish(&self, task_id: &TaskId) {
        let Some(mut buf) = self.buffers.get_mut(task_id) else {
            return;
        };
        for stream in [StreamKind::Stdout, StreamKind::Stderr] {
            let tail = std::mem::take(buf.pending_mut(stream));
            if !tail.is_empty() {
                self.push_line(&mut buf, stream, tail);
            }
        }
    }

    fn push_line(&self, buf: &mut TaskBuffer, stream: StreamKind, content: String) {
        let line = Line::new(content);
        buf.total_size += line.bytes;
        buf.stream_mut(stream).push_back(line);
        buf.drop_run = 0;

        while buf.total_size > self.max_buffer_bytes {
            let evicted = if !buf.stdout.is_empty() {
                buf.stdout.pop_front()
            } else {
                buf.stderr.pop_front()
            };
            let Some(evicted) = evicted else { break };
            buf.total_size = buf.total_size.saturating_sub(evicted.bytes);
            buf.drop_run += 1;
        }

        if buf.drop_run > 0 {
            // Coalesce the whole contiguous run into a single marker:
            // drop any marker we already emitted for this run and
            // replace it with the updated count.
            let target = buf.stream_mut(stream);
            if let Some(back) = target.back() {
                if back.content.ends_with("lines dropped") {
                    let removed = target.pop_back().unwrap();
                    buf.total_size = buf.total_size.saturating_sub(removed.bytes);
                }
            }
            let marker = Line::drop_marker(buf.drop_run);
            buf.total_size += marker.bytes;
            buf.stream_mut(stream).push_back(marker);
        }
    }

    /// Returns captured output, optionally trimmed to the last `tail`
    /// lines per stream. Does not mutate the buffer.
    #[must_use]
    pub fn get_output(&self, task_id: &TaskId, tail: Option<usize>) -> CapturedOutput {
        let Some(buf) = self.buffers.get(task_id) else {
            return CapturedOutput::default();
        };

        let render = |lines: &VecDeque<Line>| -> Vec<String> {
            match tail {
                Some(n) => lines
                    .iter()
                    .rev()
                    .take(n)
                    .rev()
                    .map(|l| l.content.clone())
                    .collect(),
                None => lines.iter().map(|l| l.content.clone()).collect(),
            }
        };

        CapturedOutput {
            stdout: render(&buf.stdout),
            stderr: render(&buf.stderr),
            total_size: buf.total_size,
        }
    }

    pub fn clear(&self, task_id: &TaskId) {
        self.buffers.remove(task_id);
    }

    pub fn cleanup(&self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_chunk_on_newlines_and_buffers_the_tail() {
        let cap = OutputCapture::new(1024);
        let id = TaskId::new("t1").unwrap();
        cap.capture(&id, StreamKind::Stdout, "hi\nthere");
        let out = cap.get_output(&id, None);
        assert_eq!(out.stdout, vec!["hi"]);
        cap.capture(&id, StreamKind::Stdout, " world\n");
        let out = cap.get_output(&id, None);
        assert_eq!(out.stdout, vec!["hi", "there world"]);
    }

    #[test]
    fn finish_flushes_trailing_partial_line() {
        let cap = OutputCapture::new(1024);
        let id = TaskId::new("t1").unwrap();
        cap.capture(&id, StreamKind::Stdout, "no newline");
        assert!(cap.get_output(&id, None).stdout.is_empty());
        cap.finish(&id);
        assert_eq!(cap.get_output(&id, None).stdout, vec!["no newline"]);
    }

    #[test]
    fn overflow_evicts_oldest_and_emits_one_drop_marker() {
        let cap = OutputCapture::new(10);
        let id = TaskId::new("t1").unwrap();
        for i in 0..10 {
            cap.capture(&id, StreamKind::Stdout, &format!("{i}\n"));
        }
        let out = cap.get_output(&id, None);
        assert!(out.total_size <= 10);
        let markers = out.stdout.iter().filter(|l| l.ends_with("lines dropped")).count();
        assert_eq!(markers, 1);
    }

    #[test]
    fn tail_does_not_mutate_buffer() {
        let cap = OutputCapture::new(1024);
        let id = TaskId::new("t1").unwrap();
        for i in 0..5 {
            cap.capture(&id, StreamKind::Stdout, &format!("{i}\n"));
        }
        let tailed = cap.get_output(&id, Some(2));
        assert_eq!(tailed.stdout, vec!["3", "4"]);
        let full = cap.get_output(&id, None);
        assert_eq!(full.stdout.len(), 5);
    }

    #[test]
    fn clear_removes_the_task_buffer() {
        let cap = OutputCapture::new(1024);
        let id = TaskId::new("t1").unwrap();
        cap.capture(&id, StreamKind::Stdout, "hi\n");
        cap.clear(&id);
        assert!(cap.get_output(&id, None).stdout.is_empty());
    }
}
