//! In-memory streams and stream openers for tests.

#![allow(clippy::unwrap_used)]

use crate::connect::{OpenError, StreamOpener, StreamTarget};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// What a [`MockStream`] does once it has handed out all of its input.
#[derive(Clone, Copy, Debug)]
enum AfterInput {
    /// Report EOF.
    Eof,
    /// Never become readable again.
    Hang,
    /// Fail with `ConnectionReset`.
    Fail,
}

/// The recorded output side of a [`MockStream`].
#[derive(Clone, Debug, Default)]
pub(crate) struct MockOutput {
    /// Everything written so far.
    written: Arc<Mutex<Vec<u8>>>,
    /// Whether the stream has been closed.
    closed: Arc<Mutex<bool>>,
}

impl MockOutput {
    /// Return a copy of everything written so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Return true if the stream was closed.
    pub(crate) fn closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

/// A stream that yields scripted input, and records what is written to it.
#[derive(Debug)]
pub(crate) struct MockStream {
    /// Chunks left to read, in order.  Each read returns at most one chunk.
    input: VecDeque<Vec<u8>>,
    /// Behavior once `input` is empty.
    after: AfterInput,
    /// Where output goes.
    output: MockOutput,
}

impl MockStream {
    /// Construct a stream that reads `input`, then EOF.
    pub(crate) fn new(input: Vec<Vec<u8>>) -> Self {
        Self::with(input, AfterInput::Eof)
    }

    /// Construct a stream that reads `input`, then blocks forever.
    pub(crate) fn hanging(input: Vec<Vec<u8>>) -> Self {
        Self::with(input, AfterInput::Hang)
    }

    /// Construct a stream that reads `input`, then fails.
    pub(crate) fn failing(input: Vec<Vec<u8>>) -> Self {
        Self::with(input, AfterInput::Fail)
    }

    /// Construct a stream with the given script.
    fn with(input: Vec<Vec<u8>>, after: AfterInput) -> Self {
        MockStream {
            input: input.into(),
            after,
            output: MockOutput::default(),
        }
    }

    /// Return a handle for inspecting this stream's output after it is gone.
    pub(crate) fn output(&self) -> MockOutput {
        self.output.clone()
    }

    /// Make this stream's output go to `output`.
    fn with_output(mut self, output: MockOutput) -> Self {
        self.output = output;
        self
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let Some(mut chunk) = self.input.pop_front() else {
            return match self.after {
                AfterInput::Eof => Poll::Ready(Ok(0)),
                AfterInput::Hang => Poll::Pending,
                AfterInput::Fail => Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
            };
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.input.push_front(chunk.split_off(n));
        }
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if *self.output.closed.lock().unwrap() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        self.output.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        *self.output.closed.lock().unwrap() = true;
        Poll::Ready(Ok(()))
    }
}

/// What a [`MockOpener`] does when asked for a stream.
#[derive(Clone, Debug)]
pub(crate) enum Behavior {
    /// Return a stream that yields these chunks, then EOF.
    Connect(Vec<Vec<u8>>),
    /// Fail with the error this function returns.
    Fail(fn() -> OpenError),
    /// Never finish.
    Hang,
}

/// A [`StreamOpener`] that records every target it is asked for.
#[derive(Debug)]
pub(crate) struct MockOpener {
    /// What to do on each call.
    behavior: Behavior,
    /// Every target we have been asked to open, in order.
    targets: Mutex<Vec<StreamTarget>>,
    /// Output of every stream we have returned.
    output: MockOutput,
}

impl MockOpener {
    /// Construct a new opener with `behavior`.
    pub(crate) fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(MockOpener {
            behavior,
            targets: Mutex::new(Vec::new()),
            output: MockOutput::default(),
        })
    }

    /// Return every target we've been asked for so far.
    pub(crate) fn targets(&self) -> Vec<StreamTarget> {
        self.targets.lock().unwrap().clone()
    }

    /// Return the output shared by every stream we have returned.
    pub(crate) fn output(&self) -> MockOutput {
        self.output.clone()
    }
}

#[async_trait]
impl StreamOpener for MockOpener {
    type Stream = MockStream;

    async fn open_exit_stream(&self, target: &StreamTarget) -> Result<MockStream, OpenError> {
        self.targets.lock().unwrap().push(target.clone());
        match &self.behavior {
            Behavior::Connect(input) => {
                Ok(MockStream::new(input.clone()).with_output(self.output.clone()))
            }
            Behavior::Fail(f) => Err(f()),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}
