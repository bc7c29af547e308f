// extensions/stream.rs
//
// Every firing of a signal as an unbounded async stream.
//
// Usage:
//   let mut hits = HIT.stream(&bus, enemy)?;
//   while let Some((damage,)) = hits.next().await { ... }

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Stream, StreamExt};

use crate::api::args::SignalArgs;
use crate::api::host::BusHandle;
use crate::api::types::ObjectId;
use crate::components::signal::{Connection, Signal};
use crate::error::HostError;

/// Buffers each firing until the consumer pulls it. Nothing is dropped
/// while the stream is alive.
///
/// The stream ends after its buffer drains once the registration is gone,
/// either through [`SignalStream::close`] or because the source was freed.
pub struct SignalStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    connection: Option<Connection>,
}

impl<T> SignalStream<T> {
    /// Stop listening. Items already buffered are still yielded.
    pub fn close(&mut self) {
        self.connection = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_connected)
    }
}

impl<T> Stream for SignalStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl<Args: SignalArgs> Signal<Args> {
    /// Stream every firing on `source`.
    pub fn stream(&self, bus: &BusHandle, source: ObjectId) -> Result<SignalStream<Args>, HostError> {
        self.stream_map(bus, source, |args| args)
    }

    /// Stream every firing on `source`, transformed by `f` as it arrives.
    pub fn stream_map<T, F>(&self, bus: &BusHandle, source: ObjectId, mut f: F) -> Result<SignalStream<T>, HostError>
    where
        T: 'static,
        F: FnMut(Args) -> T + 'static,
    {
        let (sender, receiver) = mpsc::unbounded();
        let signal = self.name().to_string();
        let connection = self.connect(bus, source, move |args| {
            if sender.unbounded_send(f(args)).is_err() {
                log::trace!("'{signal}' stream receiver dropped");
            }
        })?;
        Ok(SignalStream {
            receiver,
            connection: Some(connection),
        })
    }
}
