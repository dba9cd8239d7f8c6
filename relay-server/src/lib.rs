//! A blocking SMTP listener for a relay gateway
//!
//! This library accepts SMTP connections, runs each one on a worker from a
//! fixed-size threadpool and drives a `relay_session::Session` with the lines
//! it reads. A clone of the `Handler` is given to every connection.
//! # Examples
//! ```no_run
//! use relay_server::{Server, SslConfig, Handler, DataResult, Envelope};
//!
//! #[derive(Clone)]
//! struct MyHandler {}
//! impl Handler for MyHandler{
//!     fn data(&mut self, _envelope: &Envelope, _body: &[u8]) -> DataResult {
//!         DataResult::Ok
//!     }
//! }
//!
//! let addr = "127.0.0.1:10025";
//! let domain = "example.com".to_owned();
//! let ssl_config = SslConfig::None;
//! let handler = MyHandler {};
//! let mut server = Server::new(handler);
//!
//! server.with_name(domain)
//!    .with_ssl(ssl_config)
//!    .with_addr(addr)
//!    .unwrap();
//! server.serve_forever();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod err;
#[cfg(feature = "rtls")]
mod rtls;
mod running;
mod ssl;

pub use crate::err::Error;
pub use crate::running::RunningServer;
pub use crate::ssl::SslConfig;
pub use relay_session::{
    AuthMechanism, AuthResult, DataResult, Envelope, Handler, HeloResult, MailResult,
    RcptResult, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RECIPIENTS,
};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// `Server` is used to configure and start the SMTP server
pub struct Server<H>
where
    H: Handler + Clone + Send + 'static,
{
    handler: H,
    name: String,
    ssl_config: SslConfig,
    num_threads: usize,
    auth: Vec<AuthMechanism>,
    insecure_auth: bool,
    max_message_size: usize,
    max_recipients: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    tcp_listener: Option<TcpListener>,
    socket_address: Vec<SocketAddr>,
}

impl<H> Server<H>
where
    H: Handler + Clone + Send + 'static,
{
    /// Create a new server with the given Handler
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            name: "localhost".to_owned(),
            ssl_config: SslConfig::None,
            num_threads: 4,
            auth: Vec::with_capacity(2),
            insecure_auth: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_recipients: DEFAULT_MAX_RECIPIENTS,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            tcp_listener: None,
            socket_address: Vec::with_capacity(4),
        }
    }

    /// Give the server a name
    pub fn with_name(&mut self, name: String) -> &mut Self {
        self.name = name;
        self
    }

    /// Set the SSL configuration of the server
    pub fn with_ssl(&mut self, ssl_config: SslConfig) -> &mut Self {
        self.ssl_config = ssl_config;
        self
    }

    /// Set the size of the threadpool which is equal to the maximum number of
    /// concurrent SMTP sessions.
    pub fn with_num_threads(&mut self, num_threads: usize) -> &mut Self {
        self.num_threads = num_threads;
        self
    }

    /// Add an authentication mechanism that will supported by the server
    pub fn with_auth(&mut self, auth: AuthMechanism) -> &mut Self {
        self.auth.push(auth);
        self
    }

    /// Offer authentication on connections that have not started TLS
    pub fn with_insecure_auth(&mut self, allow: bool) -> &mut Self {
        self.insecure_auth = allow;
        self
    }

    /// Set the read and write timeouts of every connection
    pub fn with_timeouts(&mut self, read: Duration, write: Duration) -> &mut Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Set the largest message, in bytes, that the server accepts
    pub fn with_max_message_size(&mut self, size: usize) -> &mut Self {
        self.max_message_size = size;
        self
    }

    /// Set the largest number of recipients in one transaction
    pub fn with_max_recipients(&mut self, count: usize) -> &mut Self {
        self.max_recipients = count;
        self
    }

    /// Set a tcp listener from an already open socket
    pub fn with_tcp_listener(&mut self, listener: TcpListener) -> &mut Self {
        self.tcp_listener = Some(listener);
        self
    }

    /// Add ip addresses and ports to listen on.
    /// Returns an error if the given socket addresses are not valid.
    /// ```
    /// # use relay_server::{Server, Handler, DataResult, Envelope};
    /// # #[derive(Clone)]
    /// # struct EmptyHandler {}
    /// # impl Handler for EmptyHandler {
    /// #     fn data(&mut self, _e: &Envelope, _b: &[u8]) -> DataResult { DataResult::Ok }
    /// # }
    /// # let mut server = Server::new(EmptyHandler {});
    /// server.with_addr("127.0.0.1:10025").unwrap();
    /// ```
    pub fn with_addr<A: ToSocketAddrs>(&mut self, addr: A) -> Result<&mut Self, Error> {
        for addr in addr.to_socket_addrs()? {
            self.socket_address.push(addr);
        }
        Ok(self)
    }

    /// Start the SMTP server in a background thread
    pub fn serve(self) -> Result<RunningServer, Error> {
        RunningServer::serve(self)
    }

    /// Start the SMTP server and run forever
    pub fn serve_forever(self) -> Result<(), Error> {
        let running = RunningServer::serve(self)?;
        running.join()
    }
}
