//! Push-stream listener
//!
//! Drains the directives stream of one open connection into the multipart
//! parser and publishes every reassembled message.

use super::ConnectionEvents;
use crate::multipart::MultipartParser;
use crate::reassembly::PartReassembler;
use crate::transport::ByteStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a listener stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    Stopped,
    StreamEnded,
    StreamError,
}

pub struct DownstreamListener {
    parser: MultipartParser,
    reassembler: Arc<PartReassembler>,
    events: Arc<ConnectionEvents>,
    stop: watch::Receiver<bool>,
    delivered: usize,
}

impl DownstreamListener {
    pub fn new(
        boundary: impl Into<String>,
        reassembler: Arc<PartReassembler>,
        events: Arc<ConnectionEvents>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            parser: MultipartParser::new(boundary),
            reassembler,
            events,
            stop,
            delivered: 0,
        }
    }

    /// Messages published so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Consume the stream until it ends, fails, or the stop signal is set
    pub async fn run(mut self, mut body: ByteStream) -> ListenerExit {
        debug!(boundary = %self.parser.boundary(), "Downstream listener started");

        if *self.stop.borrow() {
            return ListenerExit::Stopped;
        }

        loop {
            tokio::select! {
                biased;

                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        debug!(delivered = self.delivered, "Downstream listener stopped");
                        return ListenerExit::Stopped;
                    }
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        self.parser.push(&bytes);
                        self.drain();
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Push stream failed");
                        return ListenerExit::StreamError;
                    }
                    None => {
                        self.parser.finish();
                        self.drain();
                        info!(delivered = self.delivered, "Push stream ended");
                        return ListenerExit::StreamEnded;
                    }
                },
            }
        }
    }

    /// Hand every complete part to the reassembler
    fn drain(&mut self) {
        while let Some(result) = self.parser.next_part() {
            match result {
                Ok(part) => {
                    for message in self.reassembler.accept(part) {
                        debug!(
                            namespace = message.namespace().unwrap_or_default(),
                            name = message.name().unwrap_or_default(),
                            "Message received"
                        );
                        self.events.message_received.fire(&message);
                        self.delivered += 1;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping malformed part on push stream"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::transport::TransportError;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;
    use std::time::Duration;

    fn collecting_events() -> (Arc<ConnectionEvents>, Arc<Mutex<Vec<Message>>>) {
        let events = Arc::new(ConnectionEvents::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        events
            .message_received
            .subscribe(move |message: &Message| sink.lock().unwrap().push(message.clone()));
        (events, received)
    }

    fn chunks(data: &[&'static [u8]]) -> ByteStream {
        stream::iter(
            data.iter()
                .map(|chunk| Ok::<Bytes, TransportError>(Bytes::from_static(*chunk)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_split_stream_delivers_merged_message() {
        let (events, received) = collecting_events();
        let (_stop, stop_rx) = watch::channel(false);
        let listener =
            DownstreamListener::new("b1", Arc::new(PartReassembler::new()), events, stop_rx);

        let body = chunks(&[
            b"--b1\r\nContent-Type: application/json\r\n\r\n{\"directive\":{\"header\":{\"messageId\":\"m1\"},",
            b"\"payload\":{\"url\":\"cid:abc\"}}}\r\n--b",
            b"1\r\nContent-Type: application/octet-stream\r\nContent-ID: <abc>\r\n\r\nDEAD",
            b"BEEF\r\n--b1--\r\n",
        ]);

        assert_eq!(listener.run(body).await, ListenerExit::StreamEnded);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message_id(), Some("m1"));
        assert_eq!(received[0].attachment().unwrap().as_ref(), b"DEADBEEF");
    }

    #[tokio::test]
    async fn test_malformed_part_does_not_stop_listener() {
        let (events, received) = collecting_events();
        let (_stop, stop_rx) = watch::channel(false);
        let listener =
            DownstreamListener::new("b1", Arc::new(PartReassembler::new()), events, stop_rx);

        let body = chunks(&[
            b"--b1\r\nthis header has no colon\r\n\r\nignored\r\n",
            b"--b1\r\nContent-Type: application/json\r\n\r\n{\"directive\":{\"header\":{\"messageId\":\"m2\"},\"payload\":{}}}\r\n--b1--\r\n",
        ]);

        assert_eq!(listener.run(body).await, ListenerExit::StreamEnded);
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message_id(), Some("m2"));
    }

    #[tokio::test]
    async fn test_stream_error_ends_listener() {
        let (events, _received) = collecting_events();
        let (_stop, stop_rx) = watch::channel(false);
        let listener =
            DownstreamListener::new("b1", Arc::new(PartReassembler::new()), events, stop_rx);

        let body = stream::iter(vec![Err(TransportError::Stream("reset".to_string()))]).boxed();
        assert_eq!(listener.run(body).await, ListenerExit::StreamError);
    }

    #[tokio::test]
    async fn test_stop_signal_ends_idle_listener() {
        let (events, _received) = collecting_events();
        let (stop, stop_rx) = watch::channel(false);
        let listener =
            DownstreamListener::new("b1", Arc::new(PartReassembler::new()), events, stop_rx);

        let handle = tokio::spawn(listener.run(stream::pending().boxed()));
        stop.send(true).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ListenerExit::Stopped);
    }
}
