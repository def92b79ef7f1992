// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Flow-controlled producer of signed `aws-chunked` frames.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::channel::oneshot;
use log::{debug, warn};
use streamsign_core::{Consumer, Error, NoopProducer, Producer, Result};

use crate::chunk::{encode_frame, ChunkSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Producing,
    Finished,
    Failed,
}

/// StreamingChunkEncoder frames a body into signed chunks of `chunk_size`
/// bytes and pushes them to a [`Consumer`].
///
/// The encoder sits between an upstream [`Producer`] of raw bytes and the
/// transport. The transport drives it through the [`Producer`] trait: while
/// paused, written bytes are only buffered; on resume, every chunk that
/// became complete meanwhile is signed and emitted in order.
///
/// The [`Completion`] returned alongside the encoder resolves with the
/// number of bytes written once the terminator went out, or with a
/// `StreamFailed` error if the body failed, was stopped, or the encoder was
/// dropped before that.
pub struct StreamingChunkEncoder<C: Consumer> {
    signer: ChunkSigner,
    chunk_size: usize,
    decoded_length: u64,
    content_length: u64,

    received: u64,
    written: u64,
    buf: BytesMut,

    state: State,
    paused: bool,
    finishing: bool,

    consumer: C,
    upstream: Box<dyn Producer + Send>,
    done: Option<oneshot::Sender<Result<u64>>>,
}

impl<C: Consumer> StreamingChunkEncoder<C> {
    pub(crate) fn new(
        signer: ChunkSigner,
        chunk_size: usize,
        decoded_length: u64,
        content_length: u64,
        consumer: C,
    ) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();

        let encoder = Self {
            signer,
            chunk_size,
            decoded_length,
            content_length,

            received: 0,
            written: 0,
            buf: BytesMut::with_capacity(chunk_size),

            state: State::Idle,
            paused: false,
            finishing: false,

            consumer,
            upstream: Box::new(NoopProducer),
            done: Some(tx),
        };
        (encoder, Completion { rx })
    }

    /// Register with the consumer and start pulling from `upstream`.
    pub fn start(&mut self, upstream: impl Producer + Send + 'static) -> Result<()> {
        if self.state != State::Idle {
            return Err(Error::unexpected("encoder has already been started"));
        }

        self.state = State::Producing;
        self.upstream = Box::new(upstream);
        self.consumer.register_producer();
        debug!(
            "start streaming {} bytes as {} encoded bytes in chunks of {}",
            self.decoded_length, self.content_length, self.chunk_size
        );
        if !self.paused {
            self.upstream.resume_producing();
        }
        Ok(())
    }

    /// Buffer `data` and emit every complete chunk unless paused.
    ///
    /// Writing past the declared decoded length fails the stream.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_producing()?;
        if self.finishing {
            return Err(Error::stream_failed("write after finish"));
        }

        self.received += data.len() as u64;
        if self.received > self.decoded_length {
            let err = Error::stream_failed(format!(
                "body is longer than the declared decoded length {}",
                self.decoded_length
            ));
            return Err(self.abort(err, true));
        }

        self.buf.extend_from_slice(data);
        self.flush_full_chunks();
        Ok(())
    }

    /// Flush the remaining partial chunk, then sign and emit the terminator.
    ///
    /// If the encoder is paused, the flush happens on the next resume. A body
    /// shorter than the declared decoded length fails the stream instead.
    pub fn finish(&mut self) -> Result<()> {
        self.check_producing()?;
        if self.finishing {
            return Ok(());
        }

        if self.received != self.decoded_length {
            let err = Error::stream_failed(format!(
                "body ended after {} bytes but {} were declared",
                self.received, self.decoded_length
            ));
            return Err(self.abort(err, true));
        }

        self.finishing = true;
        if !self.paused {
            self.complete();
        }
        Ok(())
    }

    /// Fail the stream because the upstream body errored.
    ///
    /// The terminator is withheld so the receiver sees a truncated body.
    /// Returns the error the completion resolves with, without its source.
    pub fn fail(&mut self, source: impl Into<anyhow::Error>) -> Error {
        let err = Error::stream_failed("upstream body failed").with_source(source);
        if self.state == State::Finished || self.state == State::Failed {
            return echo(&err);
        }
        self.abort(err, false)
    }

    /// Whether the transport asked the encoder to pause.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the terminator has been emitted.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Encoded bytes handed to the consumer so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Encoded length of the whole body, terminator included.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The consumer frames are written to.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// The consumer frames are written to.
    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    fn check_producing(&self) -> Result<()> {
        match self.state {
            State::Producing => Ok(()),
            State::Idle => Err(Error::unexpected("encoder has not been started")),
            State::Finished => Err(Error::stream_failed("stream has already finished")),
            State::Failed => Err(Error::stream_failed("stream has already failed")),
        }
    }

    fn flush_full_chunks(&mut self) {
        while !self.paused && self.buf.len() >= self.chunk_size {
            let chunk = self.buf.split_to(self.chunk_size).freeze();
            self.emit(&chunk);
        }
    }

    fn emit(&mut self, data: &[u8]) {
        let signature = self.signer.sign_chunk(data);

        let mut frame = BytesMut::new();
        encode_frame(&mut frame, &signature, data);
        self.written += frame.len() as u64;
        self.consumer.write(frame.freeze());
    }

    fn complete(&mut self) {
        self.flush_full_chunks();
        if !self.buf.is_empty() {
            let rest = self.buf.split().freeze();
            self.emit(&rest);
        }
        self.emit(&[]);

        self.state = State::Finished;
        self.consumer.unregister_producer();
        debug_assert_eq!(self.written, self.content_length);
        debug!("streamed body finished after {} bytes", self.written);

        if let Some(tx) = self.done.take() {
            let _ = tx.send(Ok(self.written));
        }
    }

    fn abort(&mut self, err: Error, stop_upstream: bool) -> Error {
        warn!("streamed body failed before its terminator: {err}");
        let registered = self.state == State::Producing;

        self.state = State::Failed;
        self.buf.clear();
        if stop_upstream {
            self.upstream.stop_producing();
        }
        if registered {
            self.consumer.unregister_producer();
        }

        let ret = echo(&err);
        if let Some(tx) = self.done.take() {
            let _ = tx.send(Err(err));
        }
        ret
    }
}

impl<C: Consumer> Producer for StreamingChunkEncoder<C> {
    fn pause_producing(&mut self) {
        if self.paused || matches!(self.state, State::Finished | State::Failed) {
            return;
        }
        self.paused = true;
        if self.state == State::Producing {
            self.upstream.pause_producing();
        }
    }

    fn resume_producing(&mut self) {
        if !self.paused || matches!(self.state, State::Finished | State::Failed) {
            return;
        }
        self.paused = false;
        if self.state != State::Producing {
            return;
        }

        if self.finishing {
            self.complete();
        } else {
            self.flush_full_chunks();
            self.upstream.resume_producing();
        }
    }

    fn stop_producing(&mut self) {
        if matches!(self.state, State::Finished | State::Failed) {
            return;
        }
        let err = Error::stream_failed("stream was stopped before its terminator");
        self.abort(err, true);
    }
}

/// Same kind and message, without the source.
fn echo(err: &Error) -> Error {
    Error::new(err.kind(), err.message())
}

/// Completion of a streamed body.
///
/// Resolves exactly once: `Ok(bytes_written)` after the terminator frame was
/// handed to the consumer, `Err` with kind `StreamFailed` otherwise.
#[derive(Debug)]
#[must_use = "completion does nothing unless polled"]
pub struct Completion {
    rx: oneshot::Receiver<Result<u64>>,
}

impl Completion {
    /// Take the outcome if the stream already settled.
    pub fn try_take(&mut self) -> Option<Result<u64>> {
        match self.rx.try_recv() {
            Ok(v) => v,
            Err(_) => Some(Err(dropped())),
        }
    }
}

impl Future for Completion {
    type Output = Result<u64>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(v) => Poll::Ready(v),
            Err(_) => Poll::Ready(Err(dropped())),
        }
    }
}

fn dropped() -> Error {
    Error::stream_failed("encoder dropped before the terminator was written")
}

impl<C: Consumer> std::fmt::Debug for StreamingChunkEncoder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingChunkEncoder")
            .field("chunk_size", &self.chunk_size)
            .field("decoded_length", &self.decoded_length)
            .field("received", &self.received)
            .field("written", &self.written)
            .field("buffered", &self.buf.len())
            .field("state", &self.state)
            .field("paused", &self.paused)
            .finish()
    }
}

/// Frames collected in memory, used by [`crate::SignedChunkStream`].
#[derive(Debug, Default)]
pub(crate) struct FrameQueue {
    pub(crate) frames: std::collections::VecDeque<Bytes>,
}

impl Consumer for FrameQueue {
    fn register_producer(&mut self) {}

    fn write(&mut self, data: Bytes) {
        self.frames.push_back(data);
    }

    fn unregister_producer(&mut self) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::key::SigningKey;
    use futures::executor::block_on;
    use std::sync::{Arc, Mutex};
    use streamsign_core::ErrorKind;

    const CHUNK_SIZE: usize = 16;
    const SEED: &str = "4f232c4386841ef735655705268965c44a0e4690baa4adea153f7db9fa80a0a9";

    #[derive(Debug, Default)]
    pub(crate) struct RecordingConsumer {
        pub(crate) frames: Vec<Bytes>,
        pub(crate) registered: bool,
        pub(crate) unregistered: bool,
    }

    impl Consumer for RecordingConsumer {
        fn register_producer(&mut self) {
            self.registered = true;
        }

        fn write(&mut self, data: Bytes) {
            self.frames.push(data);
        }

        fn unregister_producer(&mut self) {
            self.unregistered = true;
        }
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingProducer {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RecordingProducer {
        fn events(&self) -> Vec<&'static str> {
            self.events.lock().expect("lock poisoned").clone()
        }
    }

    impl Producer for RecordingProducer {
        fn pause_producing(&mut self) {
            self.events.lock().expect("lock poisoned").push("pause");
        }

        fn resume_producing(&mut self) {
            self.events.lock().expect("lock poisoned").push("resume");
        }

        fn stop_producing(&mut self) {
            self.events.lock().expect("lock poisoned").push("stop");
        }
    }

    fn chunk_signer() -> ChunkSigner {
        let key = SigningKey::derive(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            "20130524",
            "us-east-1",
            "s3",
        );
        ChunkSigner::new(
            key,
            "20130524T000000Z",
            "20130524/us-east-1/s3/aws4_request",
            SEED,
        )
    }

    fn encoder(
        decoded_length: u64,
    ) -> (StreamingChunkEncoder<RecordingConsumer>, Completion) {
        let _ = env_logger::builder().is_test(true).try_init();

        let content_length = crate::chunk::compute_content_length(decoded_length, CHUNK_SIZE)
            .expect("test bodies are small");
        StreamingChunkEncoder::new(
            chunk_signer(),
            CHUNK_SIZE,
            decoded_length,
            content_length,
            RecordingConsumer::default(),
        )
    }

    /// Expected frames for `chunks`, terminator included.
    fn expected_frames(chunks: &[&[u8]]) -> Vec<Bytes> {
        let mut signer = chunk_signer();
        chunks
            .iter()
            .copied()
            .chain(std::iter::once(&b""[..]))
            .map(|data| {
                let mut buf = BytesMut::new();
                encode_frame(&mut buf, &signer.sign_chunk(data), data);
                buf.freeze()
            })
            .collect()
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_frames_and_content_length() -> Result<()> {
        let data = body(2 * CHUNK_SIZE + 5);
        let (mut enc, completion) = encoder(data.len() as u64);
        enc.start(NoopProducer)?;

        for piece in data.chunks(7) {
            enc.write(piece)?;
        }
        assert_eq!(enc.consumer().frames.len(), 2, "only full chunks before finish");
        enc.finish()?;

        let expected = expected_frames(&[
            &data[..CHUNK_SIZE],
            &data[CHUNK_SIZE..2 * CHUNK_SIZE],
            &data[2 * CHUNK_SIZE..],
        ]);
        assert_eq!(enc.consumer().frames, expected);
        assert!(enc.is_finished());
        assert!(enc.consumer().registered);
        assert!(enc.consumer().unregistered);

        let total = enc.consumer().frames.iter().map(|f| f.len() as u64).sum::<u64>();
        assert_eq!(total, enc.content_length());
        assert_eq!(block_on(completion)?, total);
        Ok(())
    }

    #[test]
    fn test_empty_body_emits_only_terminator() -> Result<()> {
        let (mut enc, completion) = encoder(0);
        enc.start(NoopProducer)?;
        enc.finish()?;

        assert_eq!(enc.consumer().frames, expected_frames(&[]));
        assert!(enc.consumer().frames[0].starts_with(b"0;chunk-signature="));
        assert!(enc.consumer().frames[0].ends_with(b"\r\n\r\n"));
        assert_eq!(block_on(completion)?, enc.content_length());
        Ok(())
    }

    #[test]
    fn test_exact_chunk_body_has_no_partial_frame() -> Result<()> {
        let data = body(CHUNK_SIZE);
        let (mut enc, completion) = encoder(data.len() as u64);
        enc.start(NoopProducer)?;
        enc.write(&data)?;
        enc.finish()?;

        assert_eq!(enc.consumer().frames, expected_frames(&[&data]));
        assert_eq!(block_on(completion)?, enc.content_length());
        Ok(())
    }

    #[test]
    fn test_pause_buffers_until_resume() -> Result<()> {
        let data = body(3 * CHUNK_SIZE);
        let upstream = RecordingProducer::default();
        let (mut enc, _completion) = encoder(data.len() as u64);
        enc.start(upstream.clone())?;

        enc.pause_producing();
        assert!(enc.is_paused());
        enc.write(&data)?;
        assert!(enc.consumer().frames.is_empty());

        enc.resume_producing();
        assert_eq!(enc.consumer().frames.len(), 3);
        let expected = expected_frames(&[
            &data[..CHUNK_SIZE],
            &data[CHUNK_SIZE..2 * CHUNK_SIZE],
            &data[2 * CHUNK_SIZE..],
        ]);
        assert_eq!(enc.consumer().frames[..], expected[..3]);
        assert_eq!(upstream.events(), vec!["resume", "pause", "resume"]);
        Ok(())
    }

    #[test]
    fn test_finish_while_paused_is_deferred() -> Result<()> {
        let data = body(CHUNK_SIZE + 3);
        let (mut enc, mut completion) = encoder(data.len() as u64);
        enc.start(NoopProducer)?;

        enc.pause_producing();
        enc.write(&data)?;
        enc.finish()?;
        assert!(enc.consumer().frames.is_empty());
        assert!(completion.try_take().is_none());

        enc.resume_producing();
        assert_eq!(
            enc.consumer().frames,
            expected_frames(&[&data[..CHUNK_SIZE], &data[CHUNK_SIZE..]])
        );
        assert_eq!(completion.try_take().transpose()?, Some(enc.content_length()));
        Ok(())
    }

    #[test]
    fn test_upstream_failure_withholds_terminator() -> Result<()> {
        let data = body(CHUNK_SIZE + 3);
        let (mut enc, completion) = encoder(2 * CHUNK_SIZE as u64);
        enc.start(NoopProducer)?;
        enc.write(&data)?;

        let err = enc.fail(std::io::Error::other("connection reset by peer"));
        assert_eq!(err.kind(), ErrorKind::StreamFailed);
        assert_eq!(enc.consumer().frames.len(), 1);
        assert!(enc.consumer().unregistered);
        assert!(!enc.is_finished());

        let err = block_on(completion).expect_err("stream must fail");
        assert!(err.is_stream_error());
        assert!(std::error::Error::source(&err).is_some());

        // Nothing is accepted after a failure.
        assert!(enc.write(b"x").is_err());
        assert!(enc.finish().is_err());
        assert_eq!(enc.consumer().frames.len(), 1);
        Ok(())
    }

    #[test]
    fn test_stop_producing_cancels() -> Result<()> {
        let upstream = RecordingProducer::default();
        let (mut enc, completion) = encoder(4 * CHUNK_SIZE as u64);
        enc.start(upstream.clone())?;
        enc.write(&body(CHUNK_SIZE))?;

        enc.stop_producing();
        assert_eq!(upstream.events(), vec!["resume", "stop"]);
        assert!(enc.consumer().unregistered);

        let err = block_on(completion).expect_err("stopped stream must fail");
        assert_eq!(err.kind(), ErrorKind::StreamFailed);
        Ok(())
    }

    #[test]
    fn test_longer_body_fails_fast() -> Result<()> {
        let upstream = RecordingProducer::default();
        let (mut enc, completion) = encoder(CHUNK_SIZE as u64);
        enc.start(upstream.clone())?;

        let err = enc
            .write(&body(CHUNK_SIZE + 1))
            .expect_err("body longer than declared");
        assert_eq!(err.kind(), ErrorKind::StreamFailed);
        assert!(enc.consumer().frames.is_empty());
        assert_eq!(upstream.events(), vec!["resume", "stop"]);
        assert!(block_on(completion).is_err());
        Ok(())
    }

    #[test]
    fn test_shorter_body_fails_on_finish() -> Result<()> {
        let (mut enc, completion) = encoder(2 * CHUNK_SIZE as u64);
        enc.start(NoopProducer)?;
        enc.write(&body(CHUNK_SIZE))?;

        let err = enc.finish().expect_err("body shorter than declared");
        assert_eq!(err.kind(), ErrorKind::StreamFailed);
        assert_eq!(enc.consumer().frames.len(), 1, "terminator must be withheld");
        assert!(block_on(completion).is_err());
        Ok(())
    }

    #[test]
    fn test_dropped_encoder_fails_completion() {
        let (enc, completion) = encoder(CHUNK_SIZE as u64);
        drop(enc);

        let err = block_on(completion).expect_err("dropped encoder must fail");
        assert!(err.is_stream_error());
    }

    #[test]
    fn test_write_before_start() {
        let (mut enc, _completion) = encoder(CHUNK_SIZE as u64);
        let err = enc.write(b"x").expect_err("not started");
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(enc.start(NoopProducer).is_ok());
        assert!(enc.start(NoopProducer).is_err());
    }

    #[test]
    fn test_corrupted_chunk_only_changes_later_signatures() -> Result<()> {
        fn signatures(data: &[u8]) -> Result<Vec<String>> {
            let (mut enc, _completion) = encoder(data.len() as u64);
            enc.start(NoopProducer)?;
            enc.write(data)?;
            enc.finish()?;

            Ok(enc
                .consumer()
                .frames
                .iter()
                .map(|frame| {
                    let end = frame
                        .iter()
                        .position(|b| *b == b'\r')
                        .expect("frame must have a header line");
                    let line = std::str::from_utf8(&frame[..end]).expect("header must be ascii");
                    let (_, sig) = line
                        .split_once(";chunk-signature=")
                        .expect("header must carry a signature");
                    sig.to_string()
                })
                .collect())
        }

        let data = body(2 * CHUNK_SIZE + 5);
        let mut corrupted = data.clone();
        corrupted[CHUNK_SIZE + 1] ^= 0xff;

        let good = signatures(&data)?;
        let bad = signatures(&corrupted)?;
        assert_eq!(good.len(), 4);
        assert_ne!(good[0], good[1]);
        assert_ne!(good[1], good[2]);
        assert_ne!(good[0], good[2]);

        assert_eq!(good[0], bad[0]);
        assert_ne!(good[1], bad[1]);
        assert_ne!(good[2], bad[2]);
        assert_ne!(good[3], bad[3]);
        Ok(())
    }
}
