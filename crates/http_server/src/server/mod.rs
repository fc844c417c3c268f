//! Connection lifecycle and request dispatch.
//!
//! Accepted sockets are handed to one task each; that task exclusively
//! owns the connection's parser state and, when TLS is on, its crypto
//! bridge, so none of the per-connection state is shared or locked.
//! Requests on a connection are served strictly in arrival order; a
//! response is fully written before the next request is dispatched.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::http::method::Method;
use crate::http::parser::Context;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::middleware::cors::CorsMiddleware;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::router::{RouteHandler, Router};
use crate::tls::{SecureConn, TlsContext};
use crate::{HandlerError, HttpServerConfig, ServerError};

const READ_CHUNK: usize = 8192;
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// The application server: routes, middleware, and the accept loop.
///
/// Routes and middleware are registered while the server is still owned
/// mutably; [`HttpServer::start`] consumes the server, so nothing can be
/// mutated once serving has begun.
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
    middleware: MiddlewareChain,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig) -> Self {
        let mut middleware = MiddlewareChain::new();
        if let Some(cors) = config.cors.clone() {
            middleware.add(Arc::new(CorsMiddleware::new(cors)));
        }
        Self {
            config,
            router: Router::new(),
            middleware,
        }
    }

    pub fn get<F>(&mut self, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.router.register_callback(Method::Get, path, callback);
    }

    pub fn post<F>(&mut self, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.router.register_callback(Method::Post, path, callback);
    }

    pub fn add_route<F>(&mut self, method: Method, path: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.router.register_callback(method, path, callback);
    }

    pub fn add_handler(&mut self, method: Method, path: &str, handler: Arc<dyn RouteHandler>) {
        self.router.register_handler(method, path, handler);
    }

    /// Full router access, for parameterized routes.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.add(middleware);
    }

    /// Builds the worker runtime and serves until a fatal error.
    ///
    /// Startup failures (runtime, TLS material, bind) end the process;
    /// running without them would be silently wrong.
    pub fn start(self) {
        let workers = self.config.thread_num.max(1);
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("failed to build the worker runtime: {err}");
                std::process::exit(1);
            }
        };
        if let Err(err) = runtime.block_on(self.serve()) {
            log::error!("server terminated: {err}");
            std::process::exit(1);
        }
    }

    /// Binds the configured port and runs the accept loop.
    pub async fn serve(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.serve_on(listener).await
    }

    async fn serve_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let tls = self.config.tls.as_ref().map(TlsContext::initialize).transpose()?;
        log::warn!(
            "server listening on {}{}",
            listener.local_addr()?,
            if tls.is_some() { " (TLS)" } else { "" }
        );

        let shared = Arc::new(Shared {
            router: self.router,
            middleware: self.middleware,
            tls,
        });
        loop {
            let (stream, addr) = listener.accept().await?;
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(shared, stream).await {
                    log::debug!("connection from {addr} ended: {err}");
                }
            });
        }
    }
}

/// Read-only state shared by every connection task.
struct Shared {
    router: Router,
    middleware: MiddlewareChain,
    tls: Option<TlsContext>,
}

async fn handle_connection(shared: Arc<Shared>, mut stream: TcpStream) -> Result<(), ServerError> {
    // The handshake is not started here; it runs off the first ciphertext
    // the client sends.
    let mut secure = match &shared.tls {
        Some(context) => Some(SecureConn::new(context)?),
        None => None,
    };
    let mut context = Context::new();
    let mut inbound = BytesMut::with_capacity(READ_CHUNK);
    let mut parse_buf = BytesMut::new();

    loop {
        inbound.reserve(READ_CHUNK);
        if stream.read_buf(&mut inbound).await? == 0 {
            // Peer hung up; the context and bridge drop with this task.
            return Ok(());
        }
        let receive_time = Instant::now();

        let mut peer_closed = false;
        match secure.as_mut() {
            Some(tls) => {
                let io = match tls.on_read(&mut inbound) {
                    Ok(io) => io,
                    Err(err) => {
                        // Engine failures get no HTTP answer; the alert
                        // already went out with the last drain.
                        log::error!("TLS failure: {err}");
                        return Ok(());
                    }
                };
                if !io.ciphertext.is_empty() {
                    stream.write_all(&io.ciphertext).await?;
                }
                parse_buf.extend_from_slice(&io.plaintext);
                peer_closed = io.peer_closed;
            }
            None => {
                parse_buf.extend_from_slice(&inbound);
                inbound.clear();
            }
        }

        // Serve every complete request already buffered, in order.
        loop {
            if let Err(err) = context.parse(&mut parse_buf, receive_time) {
                log::warn!("rejecting malformed request: {err}");
                send(&mut stream, secure.as_mut(), BAD_REQUEST).await?;
                stream.shutdown().await.ok();
                return Ok(());
            }
            if !context.got_all() {
                break;
            }

            let request = context.take_request();
            let mut response = Response::new(request.wants_close());
            dispatch(&shared, request, &mut response);

            let mut wire = BytesMut::new();
            response.append_to(&mut wire);
            send(&mut stream, secure.as_mut(), &wire).await?;
            if response.close_connection {
                stream.shutdown().await.ok();
                return Ok(());
            }
        }

        if peer_closed {
            return Ok(());
        }
    }
}

async fn send(
    stream: &mut TcpStream,
    secure: Option<&mut SecureConn>,
    bytes: &[u8],
) -> Result<(), ServerError> {
    match secure {
        Some(tls) => {
            let ciphertext = tls.send(bytes)?;
            stream.write_all(&ciphertext).await?;
        }
        None => stream.write_all(bytes).await?,
    }
    Ok(())
}

/// Runs one request through the pipeline: middleware `before` hooks, the
/// router, then `after` hooks in reverse for everything that ran.
fn dispatch(shared: &Shared, mut request: Request, response: &mut Response) {
    match shared.middleware.process_before(&mut request) {
        Ok((ran, Some(early))) => {
            *response = early;
            shared.middleware.process_after(ran, response);
        }
        Ok((ran, None)) => match shared.router.route(&request, response) {
            Ok(true) => shared.middleware.process_after(ran, response),
            Ok(false) => {
                log::info!("no route for {} {}", request.method, request.path);
                response.set_status(StatusCode::NOT_FOUND);
                response.close_connection = true;
                shared.middleware.process_after(ran, response);
            }
            Err(err) => internal_error(response, &err),
        },
        Err(err) => internal_error(response, &err),
    }
}

fn internal_error(response: &mut Response, err: &HandlerError) {
    log::error!("handler failed: {err}");
    response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.set_body(err.to_string());
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::middleware::cors::CorsConfig;
    use crate::tls::TlsConfig;

    fn hello_server(config: HttpServerConfig) -> HttpServer {
        let mut server = HttpServer::new(config);
        server.get("/", |_req, resp| {
            resp.set_status(StatusCode::OK);
            resp.set_content_type("text/plain");
            resp.set_body("hi");
            Ok(())
        });
        server
    }

    async fn spawn_server(server: HttpServer) -> std::net::SocketAddr {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve_on(listener));
        addr
    }

    async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
            }
        }
        out
    }

    #[tokio::test]
    async fn serves_a_simple_get() {
        let addr = spawn_server(hello_server(HttpServerConfig::default())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let expected = b"HTTP/1.1 200 OK\r\nConnection: Keep-Alive\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi";
        let mut got = vec![0u8; expected.len()];
        stream.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn echoes_a_post_body() {
        let mut server = HttpServer::new(HttpServerConfig::default());
        server.post("/echo", |req, resp| {
            assert_eq!(req.content_length, 5);
            resp.set_status(StatusCode::OK);
            resp.set_body(req.body.clone());
            Ok(())
        });
        let addr = spawn_server(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /echo HTTP/1.1\r\nConnection: close\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        let reply = read_until_close(&mut stream).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn missing_content_length_draws_400_and_close() {
        let addr = spawn_server(hello_server(HttpServerConfig::default())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /x HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let reply = read_until_close(&mut stream).await;
        assert_eq!(reply, b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[tokio::test]
    async fn unrouted_path_draws_404_and_close() {
        let addr = spawn_server(hello_server(HttpServerConfig::default())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /nope HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let reply = read_until_close(&mut stream).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\nConnection: close\r\n"));
    }

    #[tokio::test]
    async fn handler_error_draws_500_with_the_error_text() {
        let mut server = HttpServer::new(HttpServerConfig::default());
        server.get("/boom", |_req, _resp| Err("kaboom".into()));
        let addr = spawn_server(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /boom HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let reply = read_until_close(&mut stream).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(text.ends_with("kaboom"));
    }

    #[tokio::test]
    async fn keep_alive_serves_requests_in_order() {
        let mut server = hello_server(HttpServerConfig::default());
        server.get("/second", |_req, resp| {
            resp.set_status(StatusCode::OK);
            resp.set_body("2nd");
            Ok(())
        });
        let addr = spawn_server(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // Both requests go out back to back on one connection.
        stream
            .write_all(b"GET / HTTP/1.1\r\n\r\nGET /second HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let first = b"HTTP/1.1 200 OK\r\nConnection: Keep-Alive\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi";
        let second = b"HTTP/1.1 200 OK\r\nConnection: Keep-Alive\r\nContent-Length: 3\r\n\r\n2nd";
        let mut got = vec![0u8; first.len() + second.len()];
        stream.read_exact(&mut got).await.unwrap();
        assert_eq!(&got[..first.len()], first);
        assert_eq!(&got[first.len()..], second);
    }

    #[tokio::test]
    async fn http10_without_keep_alive_closes() {
        let addr = spawn_server(hello_server(HttpServerConfig::default())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        let reply = read_until_close(&mut stream).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
    }

    #[tokio::test]
    async fn cors_preflight_never_reaches_the_router() {
        let mut config = HttpServerConfig::default();
        config.cors = Some(CorsConfig::default());
        let mut server = HttpServer::new(config);
        server.add_route(Method::Options, "/anything", |_req, _resp| {
            panic!("the preflight must be answered by the middleware");
        });
        let addr = spawn_server(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"OPTIONS /anything HTTP/1.1\r\nOrigin: https://a.example\r\n\r\n")
            .await
            .unwrap();

        // The preflight answer is keep-alive, so read a bounded prefix.
        let mut got = vec![0u8; "HTTP/1.1 204 No Content\r\n".len()];
        stream.read_exact(&mut got).await.unwrap();
        assert_eq!(got, b"HTTP/1.1 204 No Content\r\n");
        let mut rest = vec![0u8; 512];
        let n = stream.read(&mut rest).await.unwrap();
        let headers = String::from_utf8_lossy(&rest[..n]).to_string();
        assert!(headers.contains("Access-Control-Allow-Origin: *"));
        assert!(headers.contains("Access-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS"));
    }

    #[tokio::test]
    async fn path_parameters_reach_the_handler() {
        let mut server = HttpServer::new(HttpServerConfig::default());
        server
            .router_mut()
            .add_regex_callback(Method::Get, "/users/:uid/posts/:pid", |req, resp| {
                resp.set_status(StatusCode::OK);
                resp.set_body(format!(
                    "{}-{}",
                    req.path_param("param1").unwrap(),
                    req.path_param("param2").unwrap()
                ));
                Ok(())
            });
        let addr = spawn_server(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /users/42/posts/7 HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let reply = read_until_close(&mut stream).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.ends_with("\r\n\r\n42-7"));
    }

    #[tokio::test]
    async fn serves_over_tls() {
        let (cert, key) = crate::tls::context::tests::write_test_pem("server-e2e");
        let mut config = HttpServerConfig::default();
        config.tls = Some(TlsConfig::new(cert, key));
        let addr = spawn_server(hello_server(config)).await;

        let reply = tokio::task::spawn_blocking(move || {
            let tcp = std::net::TcpStream::connect(addr).unwrap();
            let client = rustls::ClientConnection::new(
                crate::tls::connection::tests::test_client_config(),
                rustls_pki_types::ServerName::try_from("localhost").unwrap(),
            )
            .unwrap();
            let mut tls = rustls::StreamOwned::new(client, tcp);
            tls.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
                .unwrap();
            let mut reply = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                match tls.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => reply.extend_from_slice(&chunk[..n]),
                }
            }
            reply
        })
        .await
        .unwrap();

        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }
}
