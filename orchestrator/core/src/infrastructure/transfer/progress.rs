// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Progress Tailing
//!
//! rsync with `--info=progress2` rewrites one status line with `\r`. The
//! tailer splits frames on both `\r` and `\n`, turns status frames into
//! [`Progress`] updates for an optional renderer and logs everything else at
//! debug level. Completion (success or failure) is signalled exactly once by
//! consuming the [`ProgressTail`] handle.

use futures::StreamExt;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info, warn};

use crate::domain::cluster::LogReader;

const MAX_FRAME_LENGTH: usize = 64 * 1024;
/// How long to keep reading after completion was signalled
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One parsed rsync `progress2` status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes: u64,
    pub percent: u8,
    /// Files transferred so far (`xfr#N`)
    pub files_transferred: Option<u64>,
    /// Files left to check out of the total (`to-chk=a/b`)
    pub to_check: Option<(u64, u64)>,
}

impl Progress {
    /// Parses a frame like
    /// `  1,238,099  42%   1.17MB/s    0:00:01 (xfr#3, to-chk=7/11)`.
    pub fn parse(frame: &str) -> Option<Progress> {
        let mut tokens = frame.split_whitespace();
        let bytes_token = tokens.next()?;
        if !bytes_token.chars().all(|c| c.is_ascii_digit() || c == ',') {
            return None;
        }
        let bytes = bytes_token.replace(',', "").parse::<u64>().ok()?;
        let percent = tokens.next()?.strip_suffix('%')?.parse::<u8>().ok()?;
        if percent > 100 {
            return None;
        }

        let mut progress = Progress {
            bytes,
            percent,
            files_transferred: None,
            to_check: None,
        };
        for token in tokens {
            let token = token.trim_matches(|c| c == '(' || c == ')' || c == ',');
            if let Some(count) = token.strip_prefix("xfr#") {
                progress.files_transferred = count.parse().ok();
            } else if let Some(ratio) = token
                .strip_prefix("to-chk=")
                .or_else(|| token.strip_prefix("ir-chk="))
            {
                if let Some((left, total)) = ratio.split_once('/') {
                    if let (Ok(left), Ok(total)) = (left.parse(), total.parse()) {
                        progress.to_check = Some((left, total));
                    }
                }
            }
        }
        Some(progress)
    }
}

/// Receives progress of one transfer.
pub trait ProgressRenderer: Send {
    fn update(&mut self, progress: &Progress);

    /// Called exactly once when the transfer is over.
    fn finish(&mut self, success: bool);
}

/// Interactive terminal bar.
pub struct BarRenderer {
    bar: ProgressBar,
}

impl BarRenderer {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for BarRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer for BarRenderer {
    fn update(&mut self, progress: &Progress) {
        self.bar.set_position(u64::from(progress.percent));
        let files = match progress.to_check {
            Some((left, total)) => format!(", {}/{} files", total.saturating_sub(left), total),
            None => String::new(),
        };
        self.bar
            .set_message(format!("{}{}", HumanBytes(progress.bytes), files));
    }

    fn finish(&mut self, success: bool) {
        if success {
            self.bar.set_position(100);
            self.bar.finish_with_message("done");
        } else {
            self.bar.abandon_with_message("failed");
        }
    }
}

/// Emits a log line every time another 10% is reached, for non-interactive output.
#[derive(Debug, Default)]
pub struct LogRenderer {
    last_bucket: Option<u8>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressRenderer for LogRenderer {
    fn update(&mut self, progress: &Progress) {
        let bucket = progress.percent / 10;
        if self.last_bucket.is_some_and(|last| last >= bucket) {
            return;
        }
        self.last_bucket = Some(bucket);
        info!(
            percent = progress.percent,
            bytes = progress.bytes,
            files = progress.files_transferred.unwrap_or(0),
            "Transfer progress"
        );
    }

    fn finish(&mut self, success: bool) {
        if success {
            info!("Transfer complete");
        } else {
            warn!("Transfer did not complete");
        }
    }
}

/// Background reader for the output of a running transfer.
pub struct ProgressTail {
    done: oneshot::Sender<bool>,
    task: JoinHandle<Option<Progress>>,
}

impl ProgressTail {
    /// Starts tailing `readers` (e.g. stdout and stderr) concurrently.
    pub fn spawn(readers: Vec<LogReader>, renderer: Option<Box<dyn ProgressRenderer>>) -> Self {
        let (done, done_rx) = oneshot::channel();
        let task = tokio::spawn(tail(readers, renderer, done_rx));
        Self { done, task }
    }

    /// Signals completion and returns the last progress seen.
    pub async fn finish(self, success: bool) -> Option<Progress> {
        // The task may already be gone if a reader panicked
        let _ = self.done.send(success);
        match self.task.await {
            Ok(last) => last,
            Err(e) => {
                warn!("Progress tail ended abnormally: {}", e);
                None
            }
        }
    }
}

async fn tail(
    readers: Vec<LogReader>,
    mut renderer: Option<Box<dyn ProgressRenderer>>,
    mut done_rx: oneshot::Receiver<bool>,
) -> Option<Progress> {
    let mut frames = futures::stream::select_all(readers.into_iter().map(|reader| {
        FramedRead::new(
            reader,
            AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), Vec::new(), MAX_FRAME_LENGTH),
        )
    }));

    let mut last = None;
    let mut streams_open = true;
    let success = loop {
        tokio::select! {
            biased;
            frame = frames.next(), if streams_open => match frame {
                Some(Ok(frame)) => handle_frame(&frame, &mut renderer, &mut last),
                Some(Err(e)) => debug!("Skipping unreadable output frame: {}", e),
                None => streams_open = false,
            },
            success = &mut done_rx => break success.unwrap_or(false),
        }
    };

    // Output written just before the process exited may still be in flight
    if streams_open {
        let drain = async {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(frame) => handle_frame(&frame, &mut renderer, &mut last),
                    Err(e) => debug!("Skipping unreadable output frame: {}", e),
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("Output still open {:?} after completion, stopped reading", DRAIN_TIMEOUT);
        }
    }

    if let Some(renderer) = renderer.as_mut() {
        renderer.finish(success);
    }
    last
}

fn handle_frame(
    frame: &[u8],
    renderer: &mut Option<Box<dyn ProgressRenderer>>,
    last: &mut Option<Progress>,
) {
    let line = String::from_utf8_lossy(frame);
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match Progress::parse(line) {
        Some(progress) => {
            if let Some(renderer) = renderer.as_mut() {
                renderer.update(&progress);
            }
            *last = Some(progress);
        }
        None => debug!("{}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    #[derive(Clone, Default)]
    struct RecordingRenderer {
        updates: Arc<Mutex<Vec<Progress>>>,
        finished: Arc<Mutex<Vec<bool>>>,
    }

    impl ProgressRenderer for RecordingRenderer {
        fn update(&mut self, progress: &Progress) {
            self.updates.lock().unwrap().push(*progress);
        }

        fn finish(&mut self, success: bool) {
            self.finished.lock().unwrap().push(success);
        }
    }

    #[test]
    fn test_parse_progress_frame() {
        let progress =
            Progress::parse("  1,238,099  42%    1.17MB/s    0:00:01 (xfr#3, to-chk=7/11)").unwrap();
        assert_eq!(progress.bytes, 1_238_099);
        assert_eq!(progress.percent, 42);
        assert_eq!(progress.files_transferred, Some(3));
        assert_eq!(progress.to_check, Some((7, 11)));

        let progress = Progress::parse("0   0%    0.00kB/s    0:00:00").unwrap();
        assert_eq!(progress.bytes, 0);
        assert_eq!(progress.files_transferred, None);
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert_eq!(Progress::parse("sending incremental file list"), None);
        assert_eq!(Progress::parse("data/file.txt"), None);
        assert_eq!(Progress::parse("sent 1,024 bytes  received 35 bytes"), None);
        assert_eq!(Progress::parse("12 250%"), None);
        assert_eq!(Progress::parse(""), None);
    }

    #[test]
    fn test_log_renderer_buckets() {
        let mut renderer = LogRenderer::new();
        let at = |percent| Progress {
            bytes: 0,
            percent,
            files_transferred: None,
            to_check: None,
        };
        renderer.update(&at(3));
        assert_eq!(renderer.last_bucket, Some(0));
        renderer.update(&at(9));
        assert_eq!(renderer.last_bucket, Some(0));
        renderer.update(&at(57));
        assert_eq!(renderer.last_bucket, Some(5));
        renderer.update(&at(40));
        assert_eq!(renderer.last_bucket, Some(5));
    }

    #[tokio::test]
    async fn test_tail_splits_carriage_returns() {
        let output: &'static [u8] = b"sending incremental file list\n\
            \r        512  10%    0.00kB/s    0:00:00 (xfr#1, to-chk=9/10)\
            \r      5,120 100%    1.00MB/s    0:00:00 (xfr#10, to-chk=0/10)\n\
            sent 5,300 bytes  received 200 bytes\n";
        let renderer = RecordingRenderer::default();

        let tail = ProgressTail::spawn(vec![Box::new(output) as LogReader], Some(Box::new(renderer.clone())));
        let last = tail.finish(true).await.unwrap();

        assert_eq!(last.percent, 100);
        assert_eq!(last.bytes, 5120);
        assert_eq!(renderer.updates.lock().unwrap().len(), 2);
        assert_eq!(*renderer.finished.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_tail_without_renderer() {
        let output: &'static [u8] = b"    100  50%  1kB/s  0:00:00\n";
        let tail = ProgressTail::spawn(vec![Box::new(output) as LogReader], None);
        let last = tail.finish(false).await.unwrap();
        assert_eq!(last.percent, 50);
    }

    #[tokio::test]
    async fn test_tail_reads_output_written_after_completion() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let renderer = RecordingRenderer::default();
        let tail = ProgressTail::spawn(vec![Box::new(reader) as LogReader], Some(Box::new(renderer.clone())));

        writer.write_all(b"     512  10%  1kB/s  0:00:00\r").await.unwrap();
        let finishing = tokio::spawn(tail.finish(true));
        tokio::task::yield_now().await;
        writer.write_all(b"   5,120 100%  1kB/s  0:00:00\n").await.unwrap();
        drop(writer);

        let last = finishing.await.unwrap().unwrap();
        assert_eq!(last.percent, 100);
        assert_eq!(renderer.updates.lock().unwrap().len(), 2);
        assert_eq!(*renderer.finished.lock().unwrap(), vec![true]);
    }
}
