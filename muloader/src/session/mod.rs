//! Upload session: the host side of the tag-writer protocol.
//!
//! The session walks the device through a fixed sequence of states:
//!
//! ```text
//! AwaitInit -> SendMeta -> AwaitTagReady -> ReadTagMeta -> TagWriteLoop
//!                               ^                              |  ^
//!                               |        TAG_WAITING           |  | BufferFill
//!                               +------------------------------+  v
//!                                                              |
//!                                   TAG_FIRST                  v
//!                            AwaitFirstTagConfirm ----------> Done
//! ```
//!
//! Device-reported problems are logged and counted; `strict` mode turns them
//! into [`Error::Protocol`]. A block only counts as written once the device's
//! readback matches it byte for byte, and a mismatching block is resent until
//! it does.
//!
//! ## Example
//!
//! ```rust,no_run
//! use muloader::{BlockSource, SessionConfig, UnattendedOperator, UploadSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = BlockSource::open("payload.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let link = muloader::SerialLink::open(&muloader::LinkConfig::new("/dev/ttyUSB0"))?;
//!         let mut session =
//!             UploadSession::new(link, source, UnattendedOperator, SessionConfig::default());
//!         let report = session.run()?;
//!         println!("{} of {} bytes written", report.bytes_written, report.expected_bytes);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod operator;
mod tag;

pub use operator::{Operator, UnattendedOperator};
pub use tag::{TagSession, UploadReport};

use crate::block::{BLOCK_SIZE, BlockSource};
use crate::error::{Error, Result};
use crate::is_interrupted_requested;
use crate::link::LinkChannel;
use crate::protocol::StatusCode;
use log::{debug, info, trace, warn};
use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};

/// Descriptive metadata lines the device sends before the capacity line.
const TAG_DETAIL_LINES: usize = 3;

/// Extra status reads after each loop iteration to collect tag error reports.
const TAG_ERROR_CHECKS: usize = 2;

/// Timeouts and error posture for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait for the device's `INIT_OK` after the link opens.
    pub init_timeout: Duration,
    /// Wait for a single status byte or a block readback.
    pub status_timeout: Duration,
    /// Wait for one tag metadata line.
    pub line_timeout: Duration,
    /// Escalate protocol anomalies and a short upload to errors.
    pub strict: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(30),
            line_timeout: Duration::from_secs(60),
            strict: false,
        }
    }
}

impl SessionConfig {
    /// Set strict mode.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the device to report `INIT_OK`.
    AwaitInit,
    /// Announcing the padded payload size.
    SendMeta,
    /// Waiting for the device to ask for a tag.
    AwaitTagReady,
    /// Reading the presented tag's metadata.
    ReadTagMeta,
    /// Handling device events for the current tag.
    TagWriteLoop,
    /// Sending and verifying one block.
    BufferFill,
    /// Asking for the first tag to close the batch.
    AwaitFirstTagConfirm,
    /// Upload finished.
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitInit => "AwaitInit",
            Self::SendMeta => "SendMeta",
            Self::AwaitTagReady => "AwaitTagReady",
            Self::ReadTagMeta => "ReadTagMeta",
            Self::TagWriteLoop => "TagWriteLoop",
            Self::BufferFill => "BufferFill",
            Self::AwaitFirstTagConfirm => "AwaitFirstTagConfirm",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Host side of one upload.
///
/// Owns the link, the payload and the operator until it is dropped.
pub struct UploadSession<L: LinkChannel, R: Read, O: Operator> {
    link: L,
    source: BlockSource<R>,
    operator: O,
    config: SessionConfig,
    state: SessionState,
    address: u64,
    tag: Option<TagSession>,
    tags_presented: usize,
    pending: Option<StatusCode>,
    report: UploadReport,
}

impl<L: LinkChannel, R: Read, O: Operator> UploadSession<L, R, O> {
    /// Create a session over an open link and a validated payload.
    pub fn new(link: L, source: BlockSource<R>, operator: O, config: SessionConfig) -> Self {
        let report = UploadReport {
            expected_bytes: source.total_padded_size(),
            ..Default::default()
        };
        Self {
            link,
            source,
            operator,
            config,
            state: SessionState::AwaitInit,
            address: 0,
            tag: None,
            tags_presented: 0,
            pending: None,
            report,
        }
    }

    /// Create a session from a raw payload reader.
    ///
    /// An empty payload fails with [`Error::EmptyPayload`]; the link is closed
    /// without any traffic.
    pub fn with_payload(
        mut link: L,
        payload: R,
        payload_len: u64,
        operator: O,
        config: SessionConfig,
    ) -> Result<Self> {
        match BlockSource::new(payload, payload_len) {
            Ok(source) => Ok(Self::new(link, source, operator, config)),
            Err(e) => {
                if let Err(close_err) = link.close() {
                    warn!("Failed to close {}: {close_err}", link.name());
                }
                Err(e)
            },
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bytes confirmed so far.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Tag being programmed, if any.
    pub fn current_tag(&self) -> Option<&TagSession> {
        self.tag.as_ref()
    }

    /// Summary of the session so far.
    pub fn report(&self) -> &UploadReport {
        &self.report
    }

    /// The operator handling prompts.
    pub fn operator(&self) -> &O {
        &self.operator
    }

    /// Consume the session and return the link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Drive the session to completion and close the link.
    ///
    /// The link is closed on success and on every error path.
    pub fn run(&mut self) -> Result<UploadReport> {
        info!(
            "Uploading {} bytes ({} padded) over {}",
            self.source.original_size(),
            self.source.total_padded_size(),
            self.link.name()
        );

        let result = self.drive();

        if let Err(e) = self.link.close() {
            warn!("Failed to close {}: {e}", self.link.name());
        }
        if let Err(e) = &result {
            debug!("Session aborted in {}: {e}", self.state);
        }
        result
    }

    fn drive(&mut self) -> Result<UploadReport> {
        while self.state != SessionState::Done {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.step()?;
        }
        Ok(self.report.clone())
    }

    /// Execute one state and move to the next.
    pub fn step(&mut self) -> Result<SessionState> {
        let next = match self.state {
            SessionState::AwaitInit => {
                self.await_init()?;
                SessionState::SendMeta
            },
            SessionState::SendMeta => {
                self.send_meta()?;
                SessionState::AwaitTagReady
            },
            SessionState::AwaitTagReady => {
                self.await_tag_ready()?;
                SessionState::ReadTagMeta
            },
            SessionState::ReadTagMeta => {
                self.read_tag_meta()?;
                SessionState::TagWriteLoop
            },
            SessionState::TagWriteLoop => self.tag_write_step()?,
            SessionState::BufferFill => {
                self.buffer_fill()?;
                self.collect_tag_errors()?;
                SessionState::TagWriteLoop
            },
            SessionState::AwaitFirstTagConfirm => {
                if self.confirm_first_tag()? {
                    self.finish()?;
                    SessionState::Done
                } else {
                    SessionState::AwaitFirstTagConfirm
                }
            },
            SessionState::Done => SessionState::Done,
        };

        if next != self.state {
            debug!("{} -> {}", self.state, next);
        }
        self.state = next;
        Ok(next)
    }

    fn await_init(&mut self) -> Result<()> {
        info!("Waiting for device on {}...", self.link.name());
        let deadline = Instant::now() + self.config.init_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::LinkTimeout(format!(
                    "no INIT_OK after {} s",
                    self.config.init_timeout.as_secs()
                )));
            }

            let byte = self.link.read_byte(remaining)?;
            match StatusCode::decode(byte) {
                Ok(StatusCode::InitOk) => {
                    info!("Device ready");
                    return Ok(());
                },
                Ok(code) => debug!("Ignoring {code} before INIT_OK"),
                Err(_) => trace!("Ignoring boot noise 0x{byte:02X}"),
            }
        }
    }

    fn send_meta(&mut self) -> Result<()> {
        let size = self.source.total_padded_size();
        let mut frame = vec![StatusCode::CodeMeta.encode()];
        frame.extend_from_slice(size.to_string().as_bytes());

        debug!("Announcing payload size {size}");
        self.link.write(&frame)?;

        let ack = self.read_status()?;
        if ack != StatusCode::CommandOk {
            self.anomaly(format!("payload size not acknowledged, got {ack}"))?;
        }
        Ok(())
    }

    fn await_tag_ready(&mut self) -> Result<()> {
        let status = self.next_status()?;
        if status != StatusCode::TagWaiting {
            self.anomaly(format!("expected TAG_WAITING, got {status}"))?;
        }

        self.tags_presented += 1;
        self.operator.present_tag(self.tags_presented)?;
        self.send_code(StatusCode::TagNext)
    }

    fn read_tag_meta(&mut self) -> Result<()> {
        let mut details = Vec::with_capacity(TAG_DETAIL_LINES);
        for _ in 0..TAG_DETAIL_LINES {
            let line = self.link.read_line(self.config.line_timeout)?;
            debug!("Tag info: {line}");
            details.push(line);
        }

        let line = self.link.read_line(self.config.line_timeout)?;
        let text = line.trim();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::MetadataParse(format!(
                "token capacity {line:?}: expected decimal digits"
            )));
        }
        let token_capacity = text.parse::<u32>().map_err(|e| {
            Error::MetadataParse(format!("token capacity {line:?}: {e}"))
        })?;

        let tag = TagSession {
            index: self.tags_presented,
            token_capacity,
            start_address: self.address,
            details,
        };
        info!(
            "Tag #{}: {} bytes capacity, resuming at offset {}",
            tag.index, tag.token_capacity, tag.start_address
        );
        self.operator.tag_started(&tag);
        self.tag = Some(tag);
        Ok(())
    }

    fn tag_write_step(&mut self) -> Result<SessionState> {
        let status = self.next_status()?;
        match status {
            StatusCode::TagFirst => {
                self.finish_tag();
                return Ok(SessionState::AwaitFirstTagConfirm);
            },
            StatusCode::TagWaiting => {
                self.finish_tag();
                // AwaitTagReady consumes it as the ready signal
                self.pending = Some(status);
                return Ok(SessionState::AwaitTagReady);
            },
            StatusCode::BufferWaiting => return Ok(SessionState::BufferFill),
            StatusCode::TagUpdatingMeta => info!("Device is updating tag metadata"),
            code if code.is_tag_error() => self.tag_error(code)?,
            other => self.anomaly(format!("unexpected {other} while writing tag"))?,
        }

        self.collect_tag_errors()?;
        Ok(SessionState::TagWriteLoop)
    }

    fn buffer_fill(&mut self) -> Result<()> {
        let total = self.source.total_padded_size();
        let block = self.source.next_block()?.ok_or_else(|| {
            Error::Protocol(format!(
                "device requested a block past the end of the payload ({total} bytes)"
            ))
        })?;

        let mut attempt: u64 = 0;
        loop {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            attempt += 1;
            trace!("Block @{} attempt {attempt}", block.address());

            self.send_code(StatusCode::CodeBegin)?;
            self.link.write(block.data())?;

            let confirm = self.read_status()?;
            if confirm != StatusCode::BufferOk {
                self.note(&format!(
                    "block @{}: device reported {confirm} while filling",
                    block.address()
                ));
            }

            let mut readback = [0u8; BLOCK_SIZE];
            self.link
                .read_exact(&mut readback, self.config.status_timeout)?;

            match block.first_mismatch(&readback) {
                None => break,
                Some(index) => {
                    warn!(
                        "Block @{} readback mismatch at byte {index} (sent 0x{:02X}, got 0x{:02X}), resending",
                        block.address(),
                        block.data()[index],
                        readback[index]
                    );
                    self.send_code(StatusCode::BufferError)?;
                    self.report.block_retries += 1;
                },
            }
        }

        self.send_code(StatusCode::BufferOk)?;
        self.address += BLOCK_SIZE as u64;
        debug_assert_eq!(self.address, block.address() + BLOCK_SIZE as u64);
        self.report.bytes_written = self.address;

        debug!("Block @{} committed ({}/{total})", block.address(), self.address);
        self.operator.block_committed(self.address, total);
        Ok(())
    }

    /// Read the statuses following a loop iteration, reporting tag errors.
    ///
    /// The first status that is not a tag error is kept for the next
    /// iteration.
    fn collect_tag_errors(&mut self) -> Result<()> {
        for _ in 0..TAG_ERROR_CHECKS {
            let status = self.read_status()?;
            if status.is_tag_error() {
                self.tag_error(status)?;
            } else {
                self.pending = Some(status);
                break;
            }
        }
        Ok(())
    }

    fn confirm_first_tag(&mut self) -> Result<bool> {
        self.operator.present_first_tag()?;
        self.send_code(StatusCode::TagNext)?;

        match self.read_status()? {
            StatusCode::TagOk => {
                info!("First tag confirmed");
                Ok(true)
            },
            StatusCode::TagNotFirst => {
                warn!("Presented tag is not the first tag of the set");
                Ok(false)
            },
            other => {
                self.anomaly(format!("unknown answer {other} to first tag check"))?;
                Ok(false)
            },
        }
    }

    fn finish(&mut self) -> Result<()> {
        let status = self.read_status()?;
        self.report.all_done = status == StatusCode::AllDone;
        if !self.report.all_done {
            self.anomaly(format!("expected ALL_DONE, got {status}"))?;
        }

        let expected = self.source.total_padded_size();
        if self.address != expected {
            let message = format!("wrote {} of {expected} bytes", self.address);
            if self.config.strict {
                return Err(Error::Protocol(message));
            }
            warn!("Incomplete upload: {message}");
        } else if self.report.all_done {
            info!("Upload complete: {expected} bytes on {} tag(s)", self.report.tags_programmed);
        }
        Ok(())
    }

    fn finish_tag(&mut self) {
        if let Some(tag) = self.tag.take() {
            let written = tag.written(self.address);
            if written > u64::from(tag.token_capacity) {
                warn!(
                    "Tag #{} took {written} bytes, more than its reported {} byte capacity",
                    tag.index, tag.token_capacity
                );
            }
            info!("Tag #{} done: {written} bytes", tag.index);
            self.report.tags_programmed += 1;
            self.operator.tag_finished(&tag, written);
        }
    }

    fn tag_error(&mut self, code: StatusCode) -> Result<()> {
        let index = self.tag.as_ref().map_or(self.tags_presented, |t| t.index);
        self.anomaly(format!("tag #{index} reported {code}"))
    }

    /// Log and count an anomaly; fatal in strict mode.
    fn anomaly(&mut self, message: String) -> Result<()> {
        if self.config.strict {
            return Err(Error::Protocol(message));
        }
        self.note(&message);
        Ok(())
    }

    /// Log and count an anomaly that is never escalated.
    fn note(&mut self, message: &str) {
        warn!("{message}");
        self.report.anomalies += 1;
    }

    fn next_status(&mut self) -> Result<StatusCode> {
        match self.pending.take() {
            Some(status) => Ok(status),
            None => self.read_status(),
        }
    }

    fn read_status(&mut self) -> Result<StatusCode> {
        let byte = self.link.read_byte(self.config.status_timeout)?;
        let code = StatusCode::decode(byte)?;
        trace!("<- {code}");
        Ok(code)
    }

    fn send_code(&mut self, code: StatusCode) -> Result<()> {
        trace!("-> {code}");
        self.link.write(&[code.encode()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FILL_BYTE;
    use crate::link::scripted::ScriptedLink;
    use crate::protocol::StatusCode::{
        AllDone, BufferError, BufferOk, BufferRepeat, BufferWaiting, CodeBegin, CodeMeta,
        CommandError, CommandOk, InitOk, TagErrorVerify, TagErrorWrite, TagFirst, TagNext,
        TagNotFirst, TagOk, TagUpdatingMeta, TagWaiting,
    };
    use std::io::Cursor;

    #[derive(Debug, Default)]
    struct RecordingOperator {
        tags: Vec<usize>,
        first_prompts: usize,
        committed: Vec<u64>,
        finished: Vec<(usize, u64)>,
    }

    impl Operator for RecordingOperator {
        fn present_tag(&mut self, index: usize) -> Result<()> {
            self.tags.push(index);
            Ok(())
        }

        fn present_first_tag(&mut self) -> Result<()> {
            self.first_prompts += 1;
            Ok(())
        }

        fn block_committed(&mut self, written: u64, _total: u64) {
            self.committed.push(written);
        }

        fn tag_finished(&mut self, tag: &TagSession, written: u64) {
            self.finished.push((tag.index, written));
        }
    }

    fn block_of(payload: &[u8], index: usize) -> [u8; BLOCK_SIZE] {
        let mut block = [FILL_BYTE; BLOCK_SIZE];
        let start = index * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(payload.len());
        block[..end - start].copy_from_slice(&payload[start..end]);
        block
    }

    fn tag_meta(link: &mut ScriptedLink, capacity: &str) {
        link.push_line("Card UID: 04 3A 2F 11")
            .push_line("Card SAK: 08")
            .push_line("PICC type: MIFARE 1KB")
            .push_line(capacity);
    }

    fn handshake(link: &mut ScriptedLink) {
        link.push_code(InitOk).push_code(CommandOk).push_code(TagWaiting);
        tag_meta(link, "128");
    }

    fn good_block(link: &mut ScriptedLink, block: &[u8; BLOCK_SIZE]) {
        link.push_code(BufferWaiting).push_code(BufferOk).push_bytes(block);
    }

    fn finale(link: &mut ScriptedLink) {
        link.push_code(TagFirst).push_code(TagOk).push_code(AllDone);
    }

    fn session<'a>(
        link: &'a mut ScriptedLink,
        payload: &[u8],
        operator: &'a mut RecordingOperator,
        strict: bool,
    ) -> UploadSession<&'a mut ScriptedLink, Cursor<Vec<u8>>, &'a mut RecordingOperator> {
        let _ = env_logger::builder().is_test(true).try_init();
        let source = BlockSource::from_bytes(payload.to_vec()).unwrap();
        UploadSession::new(
            link,
            source,
            operator,
            SessionConfig::default().with_strict(strict),
        )
    }

    fn count(bytes: &[u8], code: StatusCode) -> usize {
        bytes.iter().filter(|b| **b == code.encode()).count()
    }

    #[test]
    fn test_single_tag_single_block() {
        let payload = b"hello tag!".to_vec();
        let block = block_of(&payload, 0);

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block);
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let mut s = session(&mut link, &payload, &mut operator, false);
        let report = s.run().unwrap();

        assert_eq!(s.state(), SessionState::Done);
        assert_eq!(s.address(), 16);
        assert_eq!(report.bytes_written, 16);
        assert_eq!(report.expected_bytes, 16);
        assert_eq!(report.tags_programmed, 1);
        assert_eq!(report.block_retries, 0);
        assert_eq!(report.anomalies, 0);
        assert!(report.all_done);
        assert!(report.is_complete());
        drop(s);

        let mut expected = vec![CodeMeta.encode(), b'1', b'6', TagNext.encode(), CodeBegin.encode()];
        expected.extend_from_slice(&block);
        expected.push(BufferOk.encode());
        expected.push(TagNext.encode());
        assert_eq!(link.written(), expected.as_slice());
        assert_eq!(link.remaining(), 0);
        assert!(link.is_closed());

        assert_eq!(operator.tags, vec![1]);
        assert_eq!(operator.first_prompts, 1);
        assert_eq!(operator.committed, vec![16]);
        assert_eq!(operator.finished, vec![(1, 16)]);
    }

    #[test]
    fn test_corrupted_readback_is_resent_until_it_matches() {
        let payload = vec![0x5A; 16];
        let block = block_of(&payload, 0);
        let mut corrupted = block;
        corrupted[3] ^= 0xFF;

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        link.push_code(BufferWaiting);
        link.push_code(BufferOk).push_bytes(&corrupted);
        link.push_code(BufferOk).push_bytes(&corrupted);
        link.push_code(BufferOk).push_bytes(&block);
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let mut s = session(&mut link, &payload, &mut operator, true);

        while s.state() != SessionState::BufferFill {
            s.step().unwrap();
        }
        assert_eq!(s.address(), 0);
        assert_eq!(s.step().unwrap(), SessionState::TagWriteLoop);
        assert_eq!(s.address(), 16);

        while s.state() != SessionState::Done {
            s.step().unwrap();
        }
        assert_eq!(s.report().block_retries, 2);
        drop(s);

        let written = link.written();
        assert_eq!(count(written, CodeBegin), 3);
        assert_eq!(count(written, BufferError), 2);
        let data_sends = written
            .windows(BLOCK_SIZE)
            .filter(|w| *w == block.as_slice())
            .count();
        assert_eq!(data_sends, 3);
        // BUFFER_OK only after the third, clean readback
        let last_begin = written.iter().rposition(|b| *b == CodeBegin.encode()).unwrap();
        let ok = written.iter().position(|b| *b == BufferOk.encode()).unwrap();
        assert!(ok > last_begin);
    }

    #[test]
    fn test_empty_payload_fails_before_any_traffic() {
        let mut link = ScriptedLink::new();
        link.push_code(InitOk);

        let rejected = matches!(
            UploadSession::with_payload(
                &mut link,
                Cursor::new(Vec::<u8>::new()),
                0,
                UnattendedOperator,
                SessionConfig::default(),
            ),
            Err(Error::EmptyPayload)
        );

        assert!(rejected);
        assert!(link.written().is_empty());
        assert_eq!(link.remaining(), 1);
        assert!(link.is_closed());
    }

    #[test]
    fn test_empty_payload_keeps_its_error_when_close_fails() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut link = ScriptedLink::failing_close();

        let rejected = matches!(
            UploadSession::with_payload(
                &mut link,
                Cursor::new(Vec::<u8>::new()),
                0,
                UnattendedOperator,
                SessionConfig::default(),
            ),
            Err(Error::EmptyPayload)
        );
        assert!(rejected);
        assert_eq!(link.close_calls(), 1);
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_two_tags() {
        let payload: Vec<u8> = (0u8..40).collect();

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        good_block(&mut link, &block_of(&payload, 1));
        link.push_code(TagWaiting);
        tag_meta(&mut link, "48");
        good_block(&mut link, &block_of(&payload, 2));
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, true)
            .run()
            .unwrap();

        assert_eq!(report.bytes_written, 48);
        assert_eq!(report.tags_programmed, 2);
        assert!(report.is_complete());
        assert_eq!(operator.tags, vec![1, 2]);
        assert_eq!(operator.finished, vec![(1, 32), (2, 16)]);
        assert_eq!(count(link.written(), TagNext), 3);
        assert_eq!(link.remaining(), 0);
    }

    #[test]
    fn test_tag_error_report_does_not_swallow_next_status() {
        let payload = vec![1u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        link.push_code(TagErrorWrite);
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, false)
            .run()
            .unwrap();

        assert_eq!(report.anomalies, 1);
        assert!(report.is_complete());
        assert_eq!(link.remaining(), 0);
    }

    #[test]
    fn test_tag_error_is_fatal_in_strict_mode() {
        let payload = vec![1u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        link.push_code(TagErrorVerify);
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, true).run();

        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(link.is_closed());
    }

    #[test]
    fn test_meta_nack_is_lenient_by_default() {
        let payload = vec![9u8; 5];

        let mut link = ScriptedLink::new();
        link.push_code(InitOk).push_code(CommandError).push_code(TagWaiting);
        tag_meta(&mut link, "64");
        good_block(&mut link, &block_of(&payload, 0));
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, false)
            .run()
            .unwrap();
        assert_eq!(report.anomalies, 1);
        assert!(report.is_complete());
    }

    #[test]
    fn test_meta_nack_is_fatal_in_strict_mode() {
        let payload = vec![9u8; 5];

        let mut link = ScriptedLink::new();
        link.push_code(InitOk).push_code(CommandError);

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, true).run();
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_short_upload_is_a_warning_unless_strict() {
        let payload = vec![3u8; 32];

        let script = |link: &mut ScriptedLink| {
            handshake(link);
            good_block(link, &block_of(&payload, 0));
            finale(link);
        };

        let mut link = ScriptedLink::new();
        script(&mut link);
        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, false)
            .run()
            .unwrap();
        assert_eq!(report.bytes_written, 16);
        assert_eq!(report.expected_bytes, 32);
        assert!(report.all_done);
        assert!(!report.is_complete());

        let mut link = ScriptedLink::new();
        script(&mut link);
        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, true).run();
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_not_first_tag_prompts_again() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        link.push_code(TagFirst)
            .push_code(TagNotFirst)
            .push_code(TagNotFirst)
            .push_code(TagOk)
            .push_code(AllDone);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, true)
            .run()
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(operator.first_prompts, 3);
        assert_eq!(count(link.written(), TagNext), 4);
    }

    #[test]
    fn test_boot_noise_before_init_is_ignored() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        link.push_bytes(&[0x00, b'x', 0xF0]).push_code(TagWaiting);
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, true)
            .run()
            .unwrap();
        assert!(report.is_complete());
    }

    #[test]
    fn test_updating_meta_is_informational() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        link.push_code(TagUpdatingMeta);
        good_block(&mut link, &block_of(&payload, 0));
        link.push_code(TagUpdatingMeta);
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, true)
            .run()
            .unwrap();
        assert_eq!(report.anomalies, 0);
        assert!(report.is_complete());
    }

    #[test]
    fn test_malformed_capacity() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        link.push_code(InitOk).push_code(CommandOk).push_code(TagWaiting);
        tag_meta(&mut link, "12x");

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, false).run();
        assert!(matches!(result, Err(Error::MetadataParse(_))));
        assert!(link.is_closed());
    }

    #[test]
    fn test_signed_or_spaced_capacity_is_rejected() {
        for capacity in ["+128", "-1", "1 2", ""] {
            let payload = vec![0u8; 16];

            let mut link = ScriptedLink::new();
            link.push_code(InitOk).push_code(CommandOk).push_code(TagWaiting);
            tag_meta(&mut link, capacity);

            let mut operator = RecordingOperator::default();
            let mut s = session(&mut link, &payload, &mut operator, false);
            let result = s.run();
            assert!(
                matches!(result, Err(Error::MetadataParse(_))),
                "capacity {capacity:?} gave {result:?}"
            );
            assert_eq!(s.state(), SessionState::ReadTagMeta);
            drop(s);
            assert!(link.is_closed());
            assert_eq!(link.remaining(), 0);
        }
    }

    #[test]
    fn test_capacity_overflow_is_rejected() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        link.push_code(InitOk).push_code(CommandOk).push_code(TagWaiting);
        tag_meta(&mut link, "4294967296");

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, false).run();
        assert!(matches!(result, Err(Error::MetadataParse(_))));
        assert!(link.is_closed());
    }

    #[derive(Debug, Default)]
    struct InterruptingOperator {
        tags: Vec<usize>,
    }

    impl Operator for InterruptingOperator {
        fn present_tag(&mut self, index: usize) -> Result<()> {
            self.tags.push(index);
            crate::test_set_interrupted(true);
            Ok(())
        }

        fn present_first_tag(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_interrupt_mid_run_stops_and_closes_link() {
        let payload = vec![0x11; 32];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        good_block(&mut link, &block_of(&payload, 1));
        finale(&mut link);

        crate::test_set_interrupted(false);
        let mut operator = InterruptingOperator::default();
        let source = BlockSource::from_bytes(payload.clone()).unwrap();
        let mut s = UploadSession::new(&mut link, source, &mut operator, SessionConfig::default());
        let result = s.run();
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(s.state(), SessionState::ReadTagMeta);
        assert_eq!(s.address(), 0);
        drop(s);

        assert!(link.is_closed());
        assert_eq!(link.close_calls(), 1);
        assert!(!link.written().contains(&CodeBegin.encode()));
        assert_eq!(operator.tags, vec![1]);
    }

    #[test]
    fn test_unknown_byte_is_fatal() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        link.push_bytes(b"z");

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, false).run();
        assert!(matches!(result, Err(Error::UnknownCode(b'z'))));
        assert!(link.is_closed());
    }

    #[test]
    fn test_silent_device_times_out_and_closes_link() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        link.push_code(BufferWaiting).push_code(BufferOk).push_bytes(&[0u8; 4]);

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, false).run();
        assert!(matches!(result, Err(Error::LinkTimeout(_))));
        assert!(link.is_closed());
        assert_eq!(link.close_calls(), 1);
    }

    #[test]
    fn test_block_request_past_payload_end() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        handshake(&mut link);
        good_block(&mut link, &block_of(&payload, 0));
        link.push_code(BufferWaiting);

        let mut operator = RecordingOperator::default();
        let result = session(&mut link, &payload, &mut operator, false).run();
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unexpected_status_while_waiting_for_tag() {
        let payload = vec![0u8; 16];

        let mut link = ScriptedLink::new();
        link.push_code(InitOk).push_code(CommandOk).push_code(BufferRepeat);
        tag_meta(&mut link, "128");
        good_block(&mut link, &block_of(&payload, 0));
        finale(&mut link);

        let mut operator = RecordingOperator::default();
        let report = session(&mut link, &payload, &mut operator, false)
            .run()
            .unwrap();
        assert_eq!(report.anomalies, 1);
        assert!(report.is_complete());
    }
}
