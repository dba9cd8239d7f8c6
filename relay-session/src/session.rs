use crate::auth::AuthMechanism;
use crate::fsm::{Config, StateMachine};
use crate::response::Response;
use crate::Handler;
use either::{Left, Right};
use std::net::IpAddr;

/// Default maximum size of a message body in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
/// Default maximum number of recipients in one transaction
pub const DEFAULT_MAX_RECIPIENTS: usize = 50;

/// Builds an smtp `Session`
///
/// # Examples
/// ```
/// # use relay_session::{Session, SessionBuilder, Handler, Action, AuthMechanism};
/// # use relay_session::{DataResult, Envelope};
///
/// # use std::net::{IpAddr, Ipv4Addr};
/// # struct EmptyHandler{};
/// # impl Handler for EmptyHandler{
/// #     fn data(&mut self, _e: &Envelope, _b: &[u8]) -> DataResult { DataResult::Ok }
/// # };
/// # let addr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
/// # let handler = EmptyHandler{};
/// // Create a session builder that holds the configuration
/// let mut builder = SessionBuilder::new("server_name");
/// builder.enable_start_tls()
///        .enable_auth(AuthMechanism::Plain)
///        .max_recipients(10);
/// // Then when a client connects
/// let mut session = builder.build(addr, handler);
/// ```
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    config: Config,
}

impl SessionBuilder {
    /// Create a new session builder for the given mailserver name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            config: Config {
                name: name.into(),
                start_tls_extension: false,
                auth_mechanisms: Vec::with_capacity(2),
                allow_insecure_auth: false,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                max_recipients: DEFAULT_MAX_RECIPIENTS,
            },
        }
    }

    /// Enable support for StartTls
    pub fn enable_start_tls(&mut self) -> &mut Self {
        self.config.start_tls_extension = true;
        self
    }

    /// Enable support for an authentication mechanism.
    ///
    /// Once any mechanism is enabled, clients that start a mail transaction
    /// without authenticating are checked with `Handler::auth_anonymous`.
    pub fn enable_auth(&mut self, auth: AuthMechanism) -> &mut Self {
        if !self.config.auth_mechanisms.contains(&auth) {
            self.config.auth_mechanisms.push(auth);
        }
        self
    }

    /// Allow authentication on connections that are not using TLS
    pub fn allow_insecure_auth(&mut self) -> &mut Self {
        self.config.allow_insecure_auth = true;
        self
    }

    /// Set the largest message body, in bytes, that will be accepted
    pub fn max_message_size(&mut self, size: usize) -> &mut Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the largest number of recipients in one transaction
    pub fn max_recipients(&mut self, count: usize) -> &mut Self {
        self.config.max_recipients = count;
        self
    }

    /// Build a new session to handle a connection from the given ip address
    pub fn build<H: Handler>(&self, remote: IpAddr, handler: H) -> Session<H> {
        Session {
            handler,
            fsm: StateMachine::new(remote, self.config.clone()),
        }
    }
}

/// A single smtp session connected to a single client
pub struct Session<H: Handler> {
    handler: H,
    fsm: StateMachine,
}

impl<H: Handler> Session<H> {
    /// Get a greeting to send to the client
    pub fn greeting(&self) -> Response {
        Response::custom(220, format!("{} ESMTP", self.fsm.server_name()))
    }

    /// STARTTLS active
    pub fn tls_active(&mut self) {
        self.fsm.tls_active();
    }

    /// Has the client authenticated on this connection
    pub fn is_authenticated(&self) -> bool {
        self.fsm.is_authenticated()
    }

    /// Process a line sent by the client.
    ///
    /// The line may include the `\r\n` line ending. Inside the DATA phase the
    /// line ending is kept as part of the message body.
    /// Returns a response that should be written back to the client.
    ///
    /// # Examples
    /// ```
    /// use relay_session::{Session, SessionBuilder, Handler, Action};
    /// # use relay_session::{DataResult, Envelope};
    ///
    /// # use std::net::{IpAddr, Ipv4Addr};
    /// # struct EmptyHandler{};
    /// # impl Handler for EmptyHandler{
    /// #     fn data(&mut self, _e: &Envelope, _b: &[u8]) -> DataResult { DataResult::Ok }
    /// # };
    /// # let addr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
    /// # let handler = EmptyHandler{};
    /// # let mut session = SessionBuilder::new("name").build(addr, handler);
    /// let response = session.process(b"HELO example.com\r\n");
    ///
    /// // Check the response
    /// assert_eq!(response.is_error, false);
    /// assert_eq!(response.action, Action::Reply);
    ///
    /// // Write the response
    /// let mut msg = Vec::new();
    /// response.write_to(&mut msg);
    /// assert_eq!(&msg, b"250 OK\r\n");
    /// ```
    pub fn process(&mut self, line: &[u8]) -> Response {
        let response = match self.fsm.process_line(line) {
            Left(cmd) => self.fsm.command(&mut self.handler, cmd),
            Right(res) => res,
        };
        response.log();
        response
    }
}

//----- Tests ------------------------------------------------------------------
