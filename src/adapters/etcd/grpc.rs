//! gRPC server for the etcd v3 KV service.
//!
//! Serves `etcdserverpb.KV` through a hand-rolled tonic `Service` that frames
//! and unframes unary messages itself, so no proto codegen is needed. Only the
//! KV service is registered; clients calling Watch, Lease, Auth, Cluster or
//! Maintenance get UNIMPLEMENTED from the router.

use super::bridge::KvServer;
use super::errors::to_etcd_error;
use super::proto;
use crate::adapters::RequestContext;
use crate::core::error::{BridgeError, BridgeResult};
use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use prost::Message;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tonic::codegen::http::{header, HeaderMap, StatusCode};
use tonic::Status;

/// Default cap on a decoded request body.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Convert a BridgeError to a tonic Status.
pub fn bridge_error_to_status(e: &BridgeError) -> Status {
    let err = to_etcd_error(e);
    Status::new(tonic::Code::from(err.code as i32), err.message)
}

/// Parse a `grpc-timeout` header value (`<digits><unit>`).
///
/// Units are H, M, S, m (millis), u (micros) and n (nanos); at most eight
/// digits are allowed.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Build the request context for an incoming call.
fn request_context(headers: &HeaderMap) -> RequestContext {
    let ctx = RequestContext::new();
    match headers
        .get("grpc-timeout")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout)
    {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx,
    }
}

/// Decode gRPC message from body bytes (strips the 5-byte header).
#[allow(clippy::result_large_err)]
fn decode_grpc_message<M: Message + Default>(body: &Bytes) -> Result<M, Status> {
    if body.len() < 5 {
        return Err(Status::invalid_argument("gRPC message too short"));
    }
    if body[0] != 0 {
        return Err(Status::unimplemented("compressed gRPC messages are not supported"));
    }

    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if body.len() < 5 + len {
        return Err(Status::invalid_argument(format!(
            "gRPC message truncated: expected {} bytes, got {}",
            len,
            body.len() - 5
        )));
    }

    M::decode(&body[5..5 + len])
        .map_err(|e| Status::invalid_argument(format!("decode error: {}", e)))
}

/// Encode gRPC message to bytes (adds the 5-byte header).
fn encode_grpc_message<M: Message>(msg: &M) -> Bytes {
    let encoded = msg.encode_to_vec();

    let mut buf = BytesMut::with_capacity(5 + encoded.len());
    buf.put_u8(0); // not compressed
    buf.put_u32(encoded.len() as u32);
    buf.put_slice(&encoded);
    buf.freeze()
}

/// A unary gRPC body: one data frame, then `grpc-status: 0` trailers.
struct GrpcBody {
    data: Option<Bytes>,
    trailers_sent: bool,
}

impl http_body::Body for GrpcBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::data(data))));
        }
        if !self.trailers_sent {
            self.trailers_sent = true;
            let mut trailers = HeaderMap::new();
            trailers.insert("grpc-status", header::HeaderValue::from_static("0"));
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(trailers))));
        }
        std::task::Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers_sent
    }
}

/// Build a gRPC response with proper headers and trailers.
fn grpc_response(body: Bytes) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    let body = tonic::body::BoxBody::new(GrpcBody {
        data: Some(body),
        trailers_sent: false,
    });

    let mut response = tonic::codegen::http::Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/grpc"),
    );
    response
}

/// Build a gRPC error response.
fn grpc_error_response(status: Status) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    status.into_http()
}

/// Decode a request, run the handler and encode its outcome.
async fn unary<Req, Resp, F, Fut>(
    body: &Bytes,
    handler: F,
) -> tonic::codegen::http::Response<tonic::body::BoxBody>
where
    Req: Message + Default,
    Resp: Message,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = BridgeResult<Resp>>,
{
    let req = match decode_grpc_message::<Req>(body) {
        Ok(req) => req,
        Err(status) => return grpc_error_response(status),
    };
    match handler(req).await {
        Ok(resp) => grpc_response(encode_grpc_message(&resp)),
        Err(e) => grpc_error_response(bridge_error_to_status(&e)),
    }
}

/// gRPC server for the etcd KV service.
pub struct EtcdGrpcServer {
    bind_addr: SocketAddr,
    service: Arc<dyn KvServer>,
    max_message_size: usize,
    shutdown_rx: watch::Receiver<bool>,
}

impl EtcdGrpcServer {
    /// Create a new gRPC server.
    pub fn new(
        bind_addr: SocketAddr,
        service: Arc<dyn KvServer>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            service,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_rx,
        }
    }

    /// Set the maximum accepted request size in bytes.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Run the gRPC server until the shutdown signal flips to true.
    pub async fn run(self) -> anyhow::Result<()> {
        use tonic::transport::Server;

        let addr = self.bind_addr;
        let mut shutdown_rx = self.shutdown_rx;
        let kv = EtcdKvServer::new(self.service, self.max_message_size);

        tracing::info!(%addr, "starting etcd gRPC server");

        Server::builder()
            .add_service(kv)
            .serve_with_shutdown(addr, async move {
                while shutdown_rx.changed().await.is_ok() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                tracing::info!("gRPC server shutting down");
            })
            .await
            .with_context(|| format!("gRPC server on {} failed", addr))
    }
}

// ============================================================================
// Tonic Service Wrapper
// ============================================================================

/// Tonic service routing `etcdserverpb.KV` calls to a [`KvServer`].
#[derive(Clone)]
pub struct EtcdKvServer {
    inner: Arc<dyn KvServer>,
    max_message_size: usize,
}

impl EtcdKvServer {
    pub fn new(inner: Arc<dyn KvServer>, max_message_size: usize) -> Self {
        Self {
            inner,
            max_message_size,
        }
    }
}

impl tonic::server::NamedService for EtcdKvServer {
    const NAME: &'static str = "etcdserverpb.KV";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for EtcdKvServer
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        let max_message_size = self.max_message_size;
        let path = req.uri().path().to_string();
        let ctx = request_context(req.headers());

        Box::pin(async move {
            // Unary calls carry a single framed message; stop once it is complete.
            let mut data = BytesMut::new();
            let mut body = std::pin::pin!(req.into_body());

            loop {
                match body.as_mut().frame().await {
                    Some(Ok(frame)) => {
                        if frame.is_trailers() {
                            break;
                        }
                        if let Ok(chunk) = frame.into_data() {
                            let chunk: Bytes = chunk.into();
                            data.extend_from_slice(&chunk);
                            if data.len() > 5 + max_message_size {
                                return Ok(grpc_error_response(Status::resource_exhausted(
                                    format!(
                                        "request larger than max message size {}",
                                        max_message_size
                                    ),
                                )));
                            }
                            if data.len() >= 5 {
                                let msg_len =
                                    u32::from_be_bytes([data[1], data[2], data[3], data[4]])
                                        as usize;
                                if data.len() >= 5 + msg_len {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let e: tonic::codegen::StdError = e.into();
                        tracing::error!(%path, error = %e, "error reading request body");
                        return Ok(grpc_error_response(Status::internal(
                            "failed to read request body",
                        )));
                    }
                    None => break,
                }
            }

            let body = data.freeze();
            tracing::trace!(%path, body_len = body.len(), "handling KV request");

            let response = match path.as_str() {
                "/etcdserverpb.KV/Range" => {
                    unary(&body, |req: proto::RangeRequest| inner.range(ctx, req)).await
                }
                "/etcdserverpb.KV/Put" => {
                    unary(&body, |req: proto::PutRequest| inner.put(ctx, req)).await
                }
                "/etcdserverpb.KV/DeleteRange" => {
                    unary(&body, |req: proto::DeleteRangeRequest| {
                        inner.delete_range(ctx, req)
                    })
                    .await
                }
                "/etcdserverpb.KV/Txn" => {
                    unary(&body, |req: proto::TxnRequest| inner.txn(ctx, req)).await
                }
                "/etcdserverpb.KV/Compact" => {
                    unary(&body, |req: proto::CompactionRequest| inner.compact(ctx, req)).await
                }
                _ => {
                    tracing::warn!(%path, "unknown KV method");
                    grpc_error_response(Status::unimplemented(format!(
                        "unknown method: {}",
                        path
                    )))
                }
            };

            Ok(response)
        })
    }
}
