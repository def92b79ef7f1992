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

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::ready;
use futures::stream::Stream;
use pin_project_lite::pin_project;
use streamsign_core::{Error, NoopProducer, Result};

use crate::encoder::{Completion, FrameQueue, StreamingChunkEncoder};
use crate::SigningContext;

pin_project! {
    /// SignedChunkStream turns a body stream into a stream of signed
    /// `aws-chunked` frames, ready to be sent as the request body.
    ///
    /// The stream yields exactly [`SignedChunkStream::content_length`] bytes
    /// when the body matches the declared decoded length. If the body errors
    /// or its length differs, the stream yields one `StreamFailed` error
    /// instead of the terminator frame and then ends.
    pub struct SignedChunkStream<S> {
        #[pin]
        body: S,

        encoder: StreamingChunkEncoder<FrameQueue>,
        completion: Completion,
        done: bool,
    }
}

impl<S> SignedChunkStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    pub(crate) fn new(ctx: SigningContext, body: S) -> Result<Self> {
        let (mut encoder, completion) = ctx.into_encoder(FrameQueue::default())?;
        encoder.start(NoopProducer)?;

        Ok(Self {
            body,
            encoder,
            completion,
            done: false,
        })
    }

    /// Encoded length of the whole stream, terminator included.
    pub fn content_length(&self) -> u64 {
        self.encoder.content_length()
    }
}

impl<S> std::fmt::Debug for SignedChunkStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedChunkStream")
            .field("encoder", &self.encoder)
            .field("completion", &self.completion)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<S> Stream for SignedChunkStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(frame) = this.encoder.consumer_mut().frames.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            let res = match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(data)) => this.encoder.write(&data),
                Some(Err(err)) => Err(this.encoder.fail(err)),
                None => {
                    *this.done = true;
                    this.encoder.finish()
                }
            };

            if let Err(err) = res {
                *this.done = true;
                this.encoder.consumer_mut().frames.clear();
                return Poll::Ready(Some(Err(settled(this.completion, err))));
            }
        }
    }
}

/// Prefer the error held by the completion, it keeps the source.
fn settled(completion: &mut Completion, fallback: Error) -> Error {
    match completion.try_take() {
        Some(Err(err)) => err,
        _ => fallback,
    }
}
