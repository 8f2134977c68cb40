//! Stream backend: a context-described fetch over one HTTP/1.1 connection.
//!
//! # Design
//! Mirrors a generic "open this URL with a context" primitive. The request
//! is described by a [`StreamContext`] (method, timeout, raw header blob,
//! optional content) and sent over a single `hyper` http1 connection, with
//! `tokio-rustls` underneath for `https`. The received head is rendered back
//! into raw `Name: Value` lines, status line first, for
//! [`parse_header_block`]. The whole exchange runs on a private
//! current-thread runtime under one `tokio::time::timeout`.
//!
//! Redirects are not followed. This differs from the historical stream
//! fetch, which chased `Location` on its own.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::{Request, Version};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};
use url::{Host, Position, Url};

use super::{apply_status_policy, decode_body, elapsed_us, PreparedRequest};
use crate::config::Backend;
use crate::error::TransportError;
use crate::headers::{parse_header_block, ParsedHeaders};
use crate::http::{HttpMethod, FORM_CONTENT_TYPE};
use crate::response::{HeaderValue, Response};

pub(crate) const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Method, timeout, header blob and content of one fetch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StreamContext {
    pub method: HttpMethod,
    pub timeout: Duration,
    /// `Name: Value\r\n` repeated.
    pub header: String,
    pub content: Option<String>,
}

impl StreamContext {
    pub(crate) fn build(request: &PreparedRequest<'_>) -> Self {
        let mut caller = request.headers.clone();
        if request.options.encoding.is_some() {
            caller.insert("Accept-Encoding", "gzip");
        }
        let mut headers = request.default_headers.merged_with(&caller);
        if !headers.contains("host") {
            headers.insert("Host", host_header(&request.url));
        }
        if !headers.contains("connection") {
            headers.insert("Connection", "close");
        }

        let content = (!request.data.is_empty()).then(|| request.data.form_encoded());
        if let Some(content) = &content {
            if request.data.is_form() {
                headers.insert("Content-Type", FORM_CONTENT_TYPE);
            }
            headers.insert("Content-Length", content.len().to_string());
        }

        Self {
            method: request.method,
            timeout: request.timeout,
            header: headers.iter().map(|(k, v)| format!("{k}: {v}\r\n")).collect(),
            content,
        }
    }

    /// The header blob split back into name/value pairs.
    pub(crate) fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
    }

    /// The HTTP/1.1 request for `url`, with an origin-form target.
    pub(crate) fn to_request(&self, url: &Url) -> Result<Request<Full<Bytes>>, TransportError> {
        let target = &url[Position::BeforePath..Position::AfterQuery];
        let builder = Request::builder()
            .method(self.method.as_str())
            .uri(target)
            .version(Version::HTTP_11);
        let body = self.content.clone().map(Bytes::from).unwrap_or_default();
        self.header_pairs()
            .fold(builder, |builder, (name, value)| builder.header(name, value))
            .body(Full::new(body))
            .map_err(|err| TransportError::Io(format!("request could not be built: {err}")))
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

struct RawResponse {
    head: ParsedHeaders,
    body: Vec<u8>,
}

pub(crate) fn execute(request: &PreparedRequest<'_>) -> Response {
    let mut response = Response::new(Backend::Stream);
    let context = StreamContext::build(request);

    let start = Instant::now();
    let timing = &mut response.timing;
    let fetched = block_on(async {
        tokio::time::timeout(context.timeout, fetch(&request.url, &context, timing, start))
            .await
            .unwrap_or(Err(TransportError::Timeout))
    })
    .and_then(|fetched| fetched);
    response.timing.insert("done".to_string(), elapsed_us(start));

    let raw = match fetched {
        Ok(raw) => raw,
        Err(err) => {
            response.fail(err);
            return response;
        }
    };

    response.protocol_version = raw.head.protocol_version;
    response.status_code = raw.head.status_code;
    response.headers = raw.head.headers;
    response.body = raw.body;

    if response.header("content-encoding") == Some(&HeaderValue::Text("gzip".to_string())) {
        match decode_body("gzip", std::mem::take(&mut response.body)) {
            Ok(decoded) => response.body = decoded,
            Err(err) => {
                response.fail(TransportError::Decode(err.to_string()));
                return response;
            }
        }
    }

    apply_status_policy(&mut response, request.options.error_on_http_status);
    response
}

/// Drive `future` to completion on a private current-thread runtime.
///
/// When the caller is already inside a tokio runtime, the private runtime
/// lives on a scoped thread, since nesting `block_on` panics.
fn block_on<F>(future: F) -> Result<F::Output, TransportError>
where
    F: Future + Send,
    F::Output: Send,
{
    let drive = move || -> Result<F::Output, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(future))
    };
    if tokio::runtime::Handle::try_current().is_err() {
        return drive();
    }
    thread::scope(|scope| scope.spawn(drive).join())
        .unwrap_or_else(|_| Err(TransportError::Io("stream worker panicked".to_string())))
}

async fn fetch(
    url: &Url,
    context: &StreamContext,
    timing: &mut BTreeMap<String, u64>,
    start: Instant,
) -> Result<RawResponse, TransportError> {
    let tcp = connect(url).await?;
    if url.scheme() == "https" {
        let tls = TlsConnector::from(tls_config()?)
            .connect(server_name(url)?, tcp)
            .await
            .map_err(|err| TransportError::Tls(err.to_string()))?;
        timing.insert("stream_connect_time_us".to_string(), elapsed_us(start));
        exchange(tls, url, context, timing, start).await
    } else {
        timing.insert("stream_connect_time_us".to_string(), elapsed_us(start));
        exchange(tcp, url, context, timing, start).await
    }
}

/// Connect to the first resolved address that accepts.
async fn connect(url: &Url) -> Result<TcpStream, TransportError> {
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<SocketAddr> = match url.host() {
        Some(Host::Ipv4(ip)) => vec![SocketAddr::from((ip, port))],
        Some(Host::Ipv6(ip)) => vec![SocketAddr::from((ip, port))],
        Some(Host::Domain(name)) => lookup_host((name, port))
            .await
            .map_err(|err| TransportError::Resolve(err.to_string()))?
            .collect(),
        None => return Err(TransportError::InvalidUrl("URL has no host".to_string())),
    };

    let mut last = TransportError::Resolve("no addresses resolved".to_string());
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last = err.into();
            }
        }
    }
    Err(last)
}

fn tls_config() -> Result<Arc<rustls::ClientConfig>, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| TransportError::Tls(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn server_name(url: &Url) -> Result<ServerName<'static>, TransportError> {
    match url.host() {
        Some(Host::Domain(name)) => {
            ServerName::try_from(name.to_string()).map_err(|err| TransportError::Tls(err.to_string()))
        }
        Some(Host::Ipv4(ip)) => Ok(ServerName::from(IpAddr::V4(ip))),
        Some(Host::Ipv6(ip)) => Ok(ServerName::from(IpAddr::V6(ip))),
        None => Err(TransportError::InvalidUrl("URL has no host".to_string())),
    }
}

/// Send the request over `io` and collect the raw head lines and body.
async fn exchange<T>(
    io: T,
    url: &Url,
    context: &StreamContext,
    timing: &mut BTreeMap<String, u64>,
    start: Instant,
) -> Result<RawResponse, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(error = %err, "stream connection ended with an error");
        }
    });

    let reply = sender.send_request(context.to_request(url)?).await?;
    timing.insert("stream_starttransfer_time_us".to_string(), elapsed_us(start));

    let mut lines = Vec::with_capacity(reply.headers().len() + 1);
    lines.push(format!("{:?} {}", reply.version(), reply.status()));
    for (name, value) in reply.headers() {
        lines.push(format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())));
    }
    for line in &lines {
        trace!(line = %line, "stream response header");
    }
    let head = parse_header_block(&lines);

    let body = reply.into_body().collect().await?.to_bytes().to_vec();
    Ok(RawResponse { head, body })
}
