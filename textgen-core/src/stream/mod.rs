//! Pull-based decoder for event-stream responses.
//!
//! Contract:
//! - `recv` yields `Ok(Some(value))` for every data frame, in wire order.
//! - `Ok(None)` is the end of the stream; it is not an error.
//! - An in-band error, a read failure or too many consecutive empty frames
//!   end the session and release the response body.
//! - A payload that does not decode is returned as `Decode`; the session stays open.
//! - After `close`, `recv` fails with `StreamClosed`.

pub mod accumulator;
pub mod frame;
pub mod line;

use std::io;
use std::marker::PhantomData;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use accumulator::ErrorAccumulator;
pub use frame::{ContentHint, Frame, FrameDecoder};
pub use line::{ByteStream, LineSource};

use crate::error::{CoreResult, TextGenError};
use crate::model::CompleteResponse;
use crate::telemetry::StreamLog;

/// Stream of completion deltas returned by `Client::create_complete_stream`.
pub type CompletionStream = StreamReader<CompleteResponse>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Closed,
}

/// One streaming session. Owns the response body until it ends or is closed.
#[derive(Debug)]
pub struct StreamReader<T> {
    source: Option<LineSource>,
    decoder: FrameDecoder,
    errors: ErrorAccumulator,
    hint: ContentHint,
    empty_messages: u32,
    empty_messages_limit: u32,
    cancel: Option<CancellationToken>,
    state: State,
    model: Option<String>,
    frames: u64,
    empty_total: u64,
    started: Instant,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StreamReader<T> {
    pub fn new(source: LineSource, empty_messages_limit: u32) -> Self {
        Self {
            source: Some(source),
            decoder: FrameDecoder::new(),
            errors: ErrorAccumulator::new(),
            hint: ContentHint::Data,
            empty_messages: 0,
            empty_messages_limit,
            cancel: None,
            state: State::Open,
            model: None,
            frames: 0,
            empty_total: 0,
            started: Instant::now(),
            _marker: PhantomData,
        }
    }

    /// Fail the next (or in-flight) read once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Model name reported in telemetry.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn empty_messages_limit(&self) -> u32 {
        self.empty_messages_limit
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Read until the next value, the end of the stream, or an error.
    pub async fn recv(&mut self) -> CoreResult<Option<T>> {
        match self.state {
            State::Closed => return Err(TextGenError::StreamClosed),
            State::Finished => return Ok(None),
            State::Open => {}
        }

        loop {
            let line = match self.next_line().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(self.terminate(TextGenError::Transport(e))),
                None => {
                    if let Some(api) = self.errors.finish() {
                        return Err(self.terminate(api.into()));
                    }
                    self.finish("eof");
                    return Ok(None);
                }
            };

            let hint = if self.errors.is_pending() {
                ContentHint::Error
            } else {
                self.hint
            };
            match self.decoder.classify(&line, hint) {
                Frame::Data(payload) => {
                    self.empty_messages = 0;
                    let value = self.decoder.decode::<T>(payload)?;
                    self.frames += 1;
                    return Ok(Some(value));
                }
                Frame::Done => {
                    self.finish("done");
                    return Ok(None);
                }
                Frame::Error(bytes) => {
                    self.errors.append(bytes);
                    if let Some(api) = self.errors.try_parse() {
                        return Err(self.terminate(api.into()));
                    }
                }
                Frame::Event(name) => self.hint = ContentHint::from_event(name),
                Frame::Boundary => self.hint = ContentHint::Data,
                Frame::Empty => {}
            }
            self.count_empty()?;
        }
    }

    /// Release the response body. Safe to call more than once.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.source.take().is_some() {
            debug!(model = self.model.as_deref(), "stream closed by caller");
            self.emit("closed", None);
        }
        self.state = State::Closed;
        Ok(())
    }

    /// Adapt into a `Stream` that ends after the first error or the end of the body.
    pub fn into_stream(self) -> BoxStream<'static, CoreResult<T>>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.recv().await {
                Ok(Some(v)) => Some((Ok(v), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    async fn next_line(&mut self) -> Option<io::Result<Bytes>> {
        let source = self.source.as_mut()?;
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Some(Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "request cancelled",
                ))),
                line = source.next() => line,
            },
            None => source.next().await,
        }
    }

    fn count_empty(&mut self) -> CoreResult<()> {
        self.empty_messages += 1;
        self.empty_total += 1;
        if self.empty_messages > self.empty_messages_limit {
            warn!(
                limit = self.empty_messages_limit,
                model = self.model.as_deref(),
                "stream stalled on empty messages"
            );
            return Err(self.terminate(TextGenError::TooManyEmptyMessages {
                limit: self.empty_messages_limit,
            }));
        }
        Ok(())
    }

    fn finish(&mut self, outcome: &str) {
        self.source = None;
        self.state = State::Finished;
        debug!(outcome, frames = self.frames, "stream finished");
        self.emit(outcome, None);
    }

    fn terminate(&mut self, err: TextGenError) -> TextGenError {
        self.source = None;
        self.state = State::Finished;
        debug!(error = %err, frames = self.frames, "stream terminated");
        self.emit("error", Some(&err));
        err
    }

    fn emit(&self, outcome: &str, err: Option<&TextGenError>) {
        let mut log = StreamLog::new()
            .model_opt(self.model.as_deref())
            .outcome(outcome)
            .frames(self.frames)
            .empty_frames(self.empty_total)
            .latency_ms(self.started.elapsed().as_millis() as u64);
        if let Some(e) = err {
            log = log.error(e.kind(), &e.to_string());
        }
        crate::telemetry::emit_stream(log);
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use super::*;
    use futures::Stream;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Delta {
        completion: String,
    }

    /// Body that records when it is dropped.
    struct TrackedBody {
        inner: futures::stream::Iter<std::vec::IntoIter<io::Result<Bytes>>>,
        released: Arc<AtomicBool>,
    }

    impl Stream for TrackedBody {
        type Item = io::Result<Bytes>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl Drop for TrackedBody {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn tracked_reader(
        chunks: &[&'static str],
        limit: u32,
    ) -> (StreamReader<Delta>, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let body = TrackedBody {
            inner: futures::stream::iter(
                chunks
                    .iter()
                    .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                    .collect::<Vec<_>>(),
            ),
            released: released.clone(),
        };
        (StreamReader::new(LineSource::from_stream(body), limit), released)
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn reader_from(chunks: &[&'static str], limit: u32) -> StreamReader<Delta> {
        let items: Vec<io::Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        StreamReader::new(LineSource::from_stream(futures::stream::iter(items)), limit)
    }

    #[tokio::test]
    async fn yields_frames_in_order_then_end() {
        let mut r = reader_from(
            &[
                "event: completion\ndata: {\"completion\":\"a\"}\n\n",
                "event: completion\ndata: {\"completion\":\"b\"}\n\n",
                "event: completion\ndata: {\"completion\":\"c\"}\n\n",
            ],
            300,
        );
        let mut got = Vec::new();
        while let Some(d) = r.recv().await.unwrap() {
            got.push(d.completion);
        }
        assert_eq!(got, vec!["a", "b", "c"]);
        // end of stream is sticky
        assert!(r.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_split_mid_line_are_reassembled() {
        let mut r = reader_from(&["data: {\"compl", "etion\":\"hel", "lo\"}\n", "\n"], 10);
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "hello");
        assert!(r.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_a_decode_error() {
        let mut r = reader_from(
            &[
                "data: {\"completion\":\"ok\"}\n\n",
                "data: {\"completion\":\n\n",
                "data: {\"completion\":\"after\"}\n\n",
            ],
            300,
        );
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "ok");
        let err = r.recv().await.unwrap_err();
        assert!(matches!(err, TextGenError::Decode(_)), "got {err:?}");
        // session stays open after a decode error
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "after");
    }

    #[tokio::test]
    async fn stall_limit_is_enforced() {
        let mut r = reader_from(
            &[": ping\n", ": ping\n", ": ping\n", ": ping\n", "data: {\"completion\":\"late\"}\n"],
            3,
        );
        let err = r.recv().await.unwrap_err();
        assert!(matches!(err, TextGenError::TooManyEmptyMessages { limit: 3 }), "got {err:?}");
        // the session is dead afterwards
        assert!(r.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_frames_up_to_the_limit_are_tolerated() {
        let mut r =
            reader_from(&[": ping\n", "\n", "id: 9\n", "data: {\"completion\":\"x\"}\n"], 3);
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "x");
    }

    #[tokio::test]
    async fn counter_resets_after_data() {
        let mut r = reader_from(
            &[
                "\n\ndata: {\"completion\":\"1\"}\n",
                "\n\ndata: {\"completion\":\"2\"}\n",
                "\n\ndata: {\"completion\":\"3\"}\n",
            ],
            2,
        );
        for want in ["1", "2", "3"] {
            assert_eq!(r.recv().await.unwrap().unwrap().completion, want);
        }
    }

    #[tokio::test]
    async fn ping_events_are_keepalives() {
        let mut r = reader_from(
            &[
                "event: ping\ndata: {\"type\": \"ping\"}\n\n",
                "event: completion\ndata: {\"completion\":\"x\"}\n\n",
            ],
            300,
        );
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "x");
    }

    #[tokio::test]
    async fn error_split_across_deliveries() {
        let mut r = reader_from(&["data: {\"error\":", "{\"message\":\"x\"}}\n\n"], 300);
        match r.recv().await.unwrap_err() {
            TextGenError::Api(e) => assert_eq!(e.message, "x"),
            other => panic!("expected Api, got {other:?}"),
        }
        assert!(r.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn error_split_across_lines() {
        let mut r = reader_from(&["{\"error\":\n", "{\"message\":\"x\"}}\n"], 300);
        match r.recv().await.unwrap_err() {
            TextGenError::Api(e) => assert_eq!(e.message, "x"),
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_event_after_data() {
        let mut r = reader_from(
            &[
                "event: completion\ndata: {\"completion\":\"a\"}\n\n",
                "event: error\n",
                "data: {\"type\": \"error\", \"error\": ",
                "{\"type\": \"overloaded_error\", \"message\": \"Overloaded\"}}\n\n",
            ],
            300,
        );
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "a");
        match r.recv().await.unwrap_err() {
            TextGenError::Api(e) => {
                assert_eq!(e.kind.as_deref(), Some("overloaded_error"));
                assert_eq!(e.message, "Overloaded");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unfinished_error_at_eof_is_reported_raw() {
        let mut r = reader_from(&["data: {\"error\": {\"message\": \"cut"], 300);
        match r.recv().await.unwrap_err() {
            TextGenError::Api(e) => assert!(e.message.contains("cut")),
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn done_marker_ends_stream() {
        let mut r = reader_from(
            &["data: {\"completion\":\"a\"}\n\ndata: [DONE]\n\ndata: {\"completion\":\"b\"}\n"],
            300,
        );
        assert!(r.recv().await.unwrap().is_some());
        assert!(r.recv().await.unwrap().is_none());
        assert!(r.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"completion\":\"a\"}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut r: StreamReader<Delta> =
            StreamReader::new(LineSource::from_stream(futures::stream::iter(items)), 300);
        assert!(r.recv().await.unwrap().is_some());
        match r.recv().await.unwrap_err() {
            TextGenError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_recv_fails_after() {
        let mut r = reader_from(&["data: {\"completion\":\"a\"}\n"], 300);
        r.close().unwrap();
        r.close().unwrap();
        assert!(r.is_closed());
        assert!(matches!(r.recv().await.unwrap_err(), TextGenError::StreamClosed));
        assert!(matches!(r.recv().await.unwrap_err(), TextGenError::StreamClosed));
    }

    #[tokio::test]
    async fn close_after_end_of_stream() {
        let mut r = reader_from(&["data: {\"completion\":\"a\"}\n"], 300);
        assert!(r.recv().await.unwrap().is_some());
        assert!(r.recv().await.unwrap().is_none());
        r.close().unwrap();
        assert!(matches!(r.recv().await.unwrap_err(), TextGenError::StreamClosed));
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_read() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<io::Result<Bytes>>();
        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"completion\":\"a\"}\n")))
            .unwrap();

        let token = CancellationToken::new();
        let mut r: StreamReader<Delta> =
            StreamReader::new(LineSource::from_stream(rx), 300).with_cancel(token.clone());
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "a");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let res = tokio::time::timeout(Duration::from_secs(5), r.recv())
            .await
            .expect("recv must not hang after cancellation");
        match res.unwrap_err() {
            TextGenError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::Interrupted),
            other => panic!("expected Transport, got {other:?}"),
        }
        canceller.await.unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn into_stream_stops_after_error() {
        let r = reader_from(
            &[
                "data: {\"completion\":\"a\"}\n",
                "data: {\"error\":{\"message\":\"bad\"}}\n",
                "data: {\"completion\":\"never\"}\n",
            ],
            300,
        );
        let items: Vec<_> = r.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(TextGenError::Api(_))));
    }

    #[tokio::test]
    async fn terminal_outcome_is_reported() {
        crate::telemetry::test_sink::install();
        let mut r = reader_from(&[": a\n", ": b\n"], 1).with_model("stall-telemetry-model");
        assert!(r.recv().await.is_err());

        let logs = crate::telemetry::test_sink::streams_for("stall-telemetry-model");
        assert_eq!(logs.len(), 1, "{logs:?}");
        assert_eq!(logs[0].outcome.as_deref(), Some("error"));
        assert_eq!(logs[0].error_kind.as_deref(), Some("stall"));
        assert_eq!(logs[0].empty_frames, Some(2));
    }

    #[tokio::test]
    async fn error_marker_tolerates_extra_whitespace() {
        for body in [
            "data:  {\"error\":{\"message\":\"boom\"}}\n\n",
            "data:\t{\"error\":{\"message\":\"boom\"}}\n\n",
        ] {
            let mut r = reader_from(&[body], 300);
            match r.recv().await.unwrap_err() {
                TextGenError::Api(e) => assert_eq!(e.message, "boom"),
                other => panic!("expected Api, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn dropping_reader_mid_stream_releases_body() {
        let (mut r, released) = tracked_reader(
            &["data: {\"completion\":\"a\"}\n", "data: {\"completion\":\"b\"}\n"],
            300,
        );
        assert_eq!(r.recv().await.unwrap().unwrap().completion, "a");
        assert!(!released.load(Ordering::SeqCst));
        drop(r);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn api_error_releases_body_before_drop() {
        let (mut r, released) = tracked_reader(
            &["data: {\"error\":{\"message\":\"x\"}}\n", "data: {\"completion\":\"b\"}\n"],
            300,
        );
        assert!(matches!(r.recv().await.unwrap_err(), TextGenError::Api(_)));
        assert!(released.load(Ordering::SeqCst));
        assert!(!r.is_closed());
    }

    #[tokio::test]
    async fn stall_releases_body_before_drop() {
        let (mut r, released) =
            tracked_reader(&["\n", "\n", "\n", "data: {\"completion\":\"b\"}\n"], 1);
        assert!(matches!(
            r.recv().await.unwrap_err(),
            TextGenError::TooManyEmptyMessages { limit: 1 }
        ));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn decode_error_keeps_body() {
        let (mut r, released) = tracked_reader(&["data: {\"completion\":\n"], 300);
        assert!(matches!(r.recv().await.unwrap_err(), TextGenError::Decode(_)));
        assert!(!released.load(Ordering::SeqCst));
        r.close().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stall_is_logged_as_warning() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut r = reader_from(&[": a\n", ": b\n"], 1).with_model("stall-log-model");
        assert!(r.recv().await.is_err());

        let out = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("WARN"), "{out}");
        assert!(out.contains("stream stalled on empty messages"), "{out}");
        assert!(out.contains("limit=1"), "{out}");
        assert!(out.contains("stall-log-model"), "{out}");
    }
}
