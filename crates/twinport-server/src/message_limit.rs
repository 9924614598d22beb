//! Host-wide gRPC message size limits.
//!
//! Every gRPC message on the wire is a frame: a one-byte compression flag,
//! a four-byte big-endian length, then the payload. [`MessageLimitLayer`]
//! reads those length prefixes as the bytes stream past, so the configured
//! limits hold for every registered service without buffering whole
//! messages.
//!
//! - A request frame longer than `max_receive` fails the request body with
//!   `RESOURCE_EXHAUSTED`; tonic hands that status back to the caller.
//! - A response frame longer than `max_send` is dropped and the stream ends
//!   with `RESOURCE_EXHAUSTED` trailers instead.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use hyper::body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tonic::body::{boxed, BoxBody};
use tonic::codegen::StdError;
use tonic::Status;
use tower::{Layer, Service};
use twinport_telemetry::logging::TARGET_GRPC;

use crate::registration::MessageLimits;

const FRAME_HEADER_LEN: usize = 5;

/// Tower layer enforcing [`MessageLimits`] on gRPC frames.
#[derive(Debug, Clone, Copy)]
pub struct MessageLimitLayer {
    limits: MessageLimits,
}

impl MessageLimitLayer {
    /// Creates the layer.
    #[must_use]
    pub const fn new(limits: MessageLimits) -> Self {
        Self { limits }
    }
}

impl<S> Layer<S> for MessageLimitLayer {
    type Service = MessageLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MessageLimitService {
            inner,
            limits: self.limits,
        }
    }
}

/// Service produced by [`MessageLimitLayer`].
#[derive(Debug, Clone)]
pub struct MessageLimitService<S> {
    inner: S,
    limits: MessageLimits,
}

impl<S, ReqBody> Service<Request<ReqBody>> for MessageLimitService<S>
where
    S: Service<Request<BoxBody>, Response = Response<BoxBody>>,
    ReqBody: Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<StdError>,
{
    type Response = Response<BoxBody>;
    type Error = S::Error;
    type Future = MessageLimitFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let max_receive = self.limits.max_receive;
        let req = req.map(|body| boxed(FrameLimitBody::incoming(body, max_receive)));
        MessageLimitFuture {
            inner: self.inner.call(req),
            max_send: self.limits.max_send,
        }
    }
}

pin_project! {
    /// Future returned by [`MessageLimitService`].
    pub struct MessageLimitFuture<F> {
        #[pin]
        inner: F,
        max_send: usize,
    }
}

impl<F, E> Future for MessageLimitFuture<F>
where
    F: Future<Output = Result<Response<BoxBody>, E>>,
{
    type Output = Result<Response<BoxBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let max_send = *this.max_send;
        let result = ready!(this.inner.poll(cx));
        Poll::Ready(result.map(|response| {
            response.map(|body| boxed(FrameLimitBody::outgoing(body, max_send)))
        }))
    }
}

/// A frame whose length prefix is over the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Oversized {
    /// Offset in the current chunk where the frame header starts, or 0 if it
    /// started in an earlier chunk.
    at: usize,
    len: usize,
}

/// Follows frame boundaries across arbitrarily split chunks.
#[derive(Debug, Clone)]
struct FrameScanner {
    max: usize,
    header: [u8; FRAME_HEADER_LEN],
    header_filled: usize,
    header_at: usize,
    payload_left: usize,
}

impl FrameScanner {
    const fn new(max: usize) -> Self {
        Self {
            max,
            header: [0; FRAME_HEADER_LEN],
            header_filled: 0,
            header_at: 0,
            payload_left: 0,
        }
    }

    fn scan(&mut self, chunk: &[u8]) -> Result<(), Oversized> {
        if self.header_filled > 0 {
            self.header_at = 0;
        }

        let mut pos = 0;
        while pos < chunk.len() {
            if self.payload_left > 0 {
                let n = self.payload_left.min(chunk.len() - pos);
                self.payload_left -= n;
                pos += n;
                continue;
            }

            if self.header_filled == 0 {
                self.header_at = pos;
            }
            let n = (FRAME_HEADER_LEN - self.header_filled).min(chunk.len() - pos);
            self.header[self.header_filled..self.header_filled + n]
                .copy_from_slice(&chunk[pos..pos + n]);
            self.header_filled += n;
            pos += n;

            if self.header_filled == FRAME_HEADER_LEN {
                self.header_filled = 0;
                let [_, a, b, c, d] = self.header;
                let len = u32::from_be_bytes([a, b, c, d]) as usize;
                if len > self.max {
                    return Err(Oversized {
                        at: self.header_at,
                        len,
                    });
                }
                self.payload_left = len;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug)]
enum Cut {
    /// Passing frames through.
    Open,
    /// Data before the oversized frame went out; the trailers are next.
    Trailers(HeaderMap),
    /// Nothing more is produced.
    Done,
}

pin_project! {
    /// A body that checks gRPC frame lengths as they pass.
    #[derive(Debug)]
    struct FrameLimitBody<B> {
        #[pin]
        inner: B,
        scanner: FrameScanner,
        direction: Direction,
        cut: Cut,
    }
}

impl<B> FrameLimitBody<B> {
    const fn incoming(inner: B, max: usize) -> Self {
        Self::new(inner, max, Direction::Incoming)
    }

    const fn outgoing(inner: B, max: usize) -> Self {
        Self::new(inner, max, Direction::Outgoing)
    }

    const fn new(inner: B, max: usize, direction: Direction) -> Self {
        Self {
            inner,
            scanner: FrameScanner::new(max),
            direction,
            cut: Cut::Open,
        }
    }
}

fn oversized_status(direction: Direction, len: usize, max: usize) -> Status {
    match direction {
        Direction::Incoming => Status::resource_exhausted(format!(
            "grpc: received message larger than max ({len} vs. {max})"
        )),
        Direction::Outgoing => Status::resource_exhausted(format!(
            "grpc: trying to send message larger than max ({len} vs. {max})"
        )),
    }
}

fn status_trailers(status: &Status) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    if let Err(e) = status.add_header(&mut trailers) {
        tracing::warn!(target: TARGET_GRPC, error = %e, "failed to encode size limit status");
        trailers.insert("grpc-status", http::HeaderValue::from_static("8"));
    }
    trailers
}

impl<B> Body for FrameLimitBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<StdError>,
{
    type Data = Bytes;
    type Error = StdError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match std::mem::replace(this.cut, Cut::Done) {
            Cut::Open => *this.cut = Cut::Open,
            Cut::Trailers(trailers) => return Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
            Cut::Done => return Poll::Ready(None),
        }

        let frame = match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
            None => return Poll::Ready(None),
        };
        let data = match frame.into_data() {
            Ok(data) => data,
            Err(frame) => return Poll::Ready(Some(Ok(frame))),
        };

        let Err(over) = this.scanner.scan(&data) else {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        };

        let status = oversized_status(*this.direction, over.len, this.scanner.max);
        tracing::debug!(
            target: TARGET_GRPC,
            len = over.len,
            max = this.scanner.max,
            direction = ?this.direction,
            "gRPC message over size limit"
        );

        match this.direction {
            Direction::Incoming => {
                *this.cut = Cut::Done;
                Poll::Ready(Some(Err(status.into())))
            }
            Direction::Outgoing if over.at > 0 => {
                *this.cut = Cut::Trailers(status_trailers(&status));
                Poll::Ready(Some(Ok(Frame::data(data.slice(..over.at)))))
            }
            Direction::Outgoing => {
                *this.cut = Cut::Done;
                Poll::Ready(Some(Ok(Frame::trailers(status_trailers(&status)))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.cut {
            Cut::Open => self.inner.is_end_stream(),
            Cut::Trailers(_) => false,
            Cut::Done => true,
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}
