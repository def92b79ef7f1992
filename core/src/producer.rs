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

//! Flow control between a body producer and the transport consuming it.
//!
//! Everything here is cooperative and single-threaded: the transport tells
//! its producer to pause or resume, and the producer only pushes bytes while
//! it is allowed to.

use bytes::Bytes;

/// Producer is the side that pushes bytes and obeys flow control.
///
/// The transport calls these methods on the producer it registered; a
/// producer that sits on top of another producer forwards them upstream.
pub trait Producer {
    /// Stop pushing bytes until [`Producer::resume_producing`] is called.
    fn pause_producing(&mut self);

    /// Continue pushing bytes.
    fn resume_producing(&mut self);

    /// Stop for good. No more bytes will be pushed after this call.
    fn stop_producing(&mut self);
}

/// Consumer is the transport side that receives framed bytes.
pub trait Consumer {
    /// Called once when a producer starts feeding this consumer.
    fn register_producer(&mut self);

    /// Hand bytes to the transport, in order.
    fn write(&mut self, data: Bytes);

    /// Called once when the producer is done, failed, or was stopped.
    fn unregister_producer(&mut self);
}

/// NoopProducer is used when there is no upstream to forward flow control to.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProducer;

impl Producer for NoopProducer {
    fn pause_producing(&mut self) {}

    fn resume_producing(&mut self) {}

    fn stop_producing(&mut self) {}
}

impl<P: Producer + ?Sized> Producer for Box<P> {
    fn pause_producing(&mut self) {
        (**self).pause_producing()
    }

    fn resume_producing(&mut self) {
        (**self).resume_producing()
    }

    fn stop_producing(&mut self) {
        (**self).stop_producing()
    }
}

impl<C: Consumer + ?Sized> Consumer for &mut C {
    fn register_producer(&mut self) {
        (**self).register_producer()
    }

    fn write(&mut self, data: Bytes) {
        (**self).write(data)
    }

    fn unregister_producer(&mut self) {
        (**self).unregister_producer()
    }
}
