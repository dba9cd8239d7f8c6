//! A library for the SMTP side of a relay gateway.
//!
//! The library supplies a parser and SMTP state machine. The user of the library
//! supplies I/O code and a `Handler` implementation that decides who may send
//! and what happens to a completed message.
//!
//! The code using the library sends lines received to `Session::process()`.
//! The session collects the envelope and body of each transaction and, once the
//! body is complete, hands both to `Handler::data()`. The value returned by the
//! handler becomes the response sent back to the email client.
//!
//! # Pseudo Code
//! ```rust,ignore
//! // Create a handler which will control the SMTP session
//! let handler = create_handler();
//!
//! // Create a SMTP session when a new client connects
//! let mut session = SessionBuilder::new("mailserver_name").build(client_ip, handler);
//!
//! // Read a line from the client
//! let line = read_line(tcp_connection);
//! // Send the line to the session
//! let res = session.process(&line);
//!
//! // Act on the response
//! match res.action {
//!     Action::Reply => {
//!         write_response(tcp_connection, &res)?;
//!     }
//!     Action::Close => {
//!         write_response(tcp_connection, &res)?;
//!         close(tcp_connection);
//!     }
//!     Action::UpgradeTls => {
//!         write_response(tcp_connection, &res)?;
//!         upgrade(tcp_connection);
//!         session.tls_active();
//!     }
//!     Action::NoReply => (), // No response needed
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod auth;
mod cmd;
mod fsm;
mod parser;
mod response;
mod session;

pub use crate::auth::AuthMechanism;
pub use crate::response::{Action, Response};
pub use crate::session::{
    Session, SessionBuilder, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RECIPIENTS,
};

use crate::response::*;
use std::net::IpAddr;

/// A `Handler` makes decisions about incoming mail commands.
///
/// A Handler implementation must be provided by code using the library.
///
/// Most methods have a default implementation that accepts the command. A
/// separate handler instance is used for each connection.
///
/// # Examples
/// ```
/// # use relay_session::{Handler, HeloResult, RcptResult, DataResult, Envelope};
///
/// # use std::net::IpAddr;
/// # struct MyHandler{};
/// impl Handler for MyHandler {
///     fn helo(&mut self, ip: IpAddr, domain: &str) -> HeloResult {
///        if domain == "this.is.spam.com" {
///            HeloResult::BadHelo
///        } else {
///            HeloResult::Ok
///        }
///     }
///
///     fn rcpt(&mut self, to: &str) -> RcptResult {
///        if to.ends_with("@example.com") {
///            RcptResult::Ok
///        } else {
///            RcptResult::NoMailbox
///        }
///     }
///
///     fn data(&mut self, envelope: &Envelope, body: &[u8]) -> DataResult {
///        println!("{} bytes from {}", body.len(), envelope.reverse_path);
///        DataResult::Ok
///     }
/// }
/// ```
pub trait Handler {
    /// Called when a client sends a ehlo or helo message
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> HeloResult {
        HeloResult::Ok
    }

    /// Called when a mail transaction is started
    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> MailResult {
        MailResult::Ok
    }

    /// Called when a mail recipient is added to the transaction
    fn rcpt(&mut self, _to: &str) -> RcptResult {
        RcptResult::Ok
    }

    /// Called once the complete message body has been received.
    ///
    /// The envelope holds every recipient accepted during the transaction and
    /// the body holds the message bytes exactly as received, after removal of
    /// SMTP dot stuffing.
    fn data(&mut self, envelope: &Envelope, body: &[u8]) -> DataResult;

    /// Called when a plain authentication request is received
    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        _authentication_id: &str,
        _password: &str,
    ) -> AuthResult {
        AuthResult::InvalidCredentials
    }

    /// Called when a login authentication request is complete
    fn auth_login(&mut self, username: &str, password: &str) -> AuthResult {
        self.auth_plain("", username, password)
    }

    /// Called when a client starts a mail transaction without authenticating
    /// and authentication is enabled
    fn auth_anonymous(&mut self, _ip: IpAddr) -> AuthResult {
        AuthResult::InvalidCredentials
    }

    /// Called when the client resets the current transaction
    fn rset(&mut self) {}
}

/// The envelope of a completed mail transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Address of the client
    pub ip: IpAddr,
    /// Domain given by the client in HELO or EHLO
    pub domain: String,
    /// The sender, empty for the null reverse path
    pub reverse_path: String,
    /// All recipients of the transaction in the order they were given
    pub forward_path: Vec<String>,
    /// Was the message declared as 8BITMIME
    pub is8bit: bool,
}

//------ Results of Handler calls ----------------------------------------------

/// `HeloResult` is the result of an smtp HELO or EHLO command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeloResult {
    /// Helo successful
    Ok,
    /// Return to indicate that Helo verification failed
    BadHelo,
}

impl From<HeloResult> for Response {
    fn from(v: HeloResult) -> Response {
        match v {
            HeloResult::Ok => OK,
            HeloResult::BadHelo => BAD_HELLO,
        }
    }
}

/// `MailResult` is the result of an smtp MAIL command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailResult {
    /// Mail command successful
    Ok,
    /// Service not available, closing transmission channel
    NoService,
    /// Authentication required
    AuthRequired,
}

impl From<MailResult> for Response {
    fn from(v: MailResult) -> Response {
        match v {
            MailResult::Ok => OK,
            MailResult::NoService => NO_SERVICE,
            MailResult::AuthRequired => AUTHENTICATION_REQUIRED,
        }
    }
}

/// `RcptResult` is the result of an smtp RCPT command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RcptResult {
    /// Recipient is valid
    Ok,
    /// The recipient cannot be relayed to
    NoMailbox,
    /// The address is not allowed
    BadMailbox,
}

impl From<RcptResult> for Response {
    fn from(v: RcptResult) -> Response {
        match v {
            RcptResult::Ok => OK,
            RcptResult::NoMailbox => NO_MAILBOX,
            RcptResult::BadMailbox => BAD_MAILBOX,
        }
    }
}

/// `DataResult` is the result of handing a completed message to the `Handler`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataResult {
    /// Message accepted
    Ok,
    /// Message refused for good, the client should not retry
    Rejected(String),
    /// Message not accepted this time, the client may retry later
    TemporaryFailure(String),
}

impl From<DataResult> for Response {
    fn from(v: DataResult) -> Response {
        match v {
            DataResult::Ok => OK,
            DataResult::Rejected(reason) => Response::custom(554, reason),
            DataResult::TemporaryFailure(reason) => Response::custom(451, reason),
        }
    }
}

/// `AuthResult` is the result of authenticating a smtp session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Authentication successful
    Ok,
    /// Temporary authentication failure
    TemporaryFailure,
    /// Invalid or insufficient credentials
    InvalidCredentials,
}

impl From<AuthResult> for Response {
    fn from(v: AuthResult) -> Response {
        match v {
            AuthResult::Ok => AUTH_OK,
            AuthResult::TemporaryFailure => TEMP_AUTH_FAILURE,
            AuthResult::InvalidCredentials => INVALID_CREDENTIALS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct TestHandler {
        ip: IpAddr,
        domain: String,
        from: String,
        to: Vec<String>,
        is8bit: bool,
        expected_data: Vec<u8>,
        // Booleans set when callbacks are successful
        helo_called: bool,
        mail_called: bool,
        rcpt_called: bool,
        data_called: bool,
    }

    impl<'a> Handler for &'a mut TestHandler {
        fn helo(&mut self, ip: IpAddr, domain: &str) -> HeloResult {
            assert_eq!(self.ip, ip);
            assert_eq!(self.domain, domain);
            self.helo_called = true;
            HeloResult::Ok
        }

        // Called when a mail message is started
        fn mail(&mut self, ip: IpAddr, domain: &str, from: &str) -> MailResult {
            assert_eq!(self.ip, ip);
            assert_eq!(self.domain, domain);
            assert_eq!(self.from, from);
            self.mail_called = true;
            MailResult::Ok
        }

        // Called when a mail recipient is set
        fn rcpt(&mut self, to: &str) -> RcptResult {
            let valid_to = self.to.iter().any(|elem| elem == to);
            assert!(valid_to, "Invalid to address");
            self.rcpt_called = true;
            RcptResult::Ok
        }

        // Called with the complete message
        fn data(&mut self, envelope: &Envelope, body: &[u8]) -> DataResult {
            assert_eq!(self.domain, envelope.domain);
            assert_eq!(self.from, envelope.reverse_path);
            assert_eq!(self.to, envelope.forward_path);
            assert_eq!(self.is8bit, envelope.is8bit);
            assert_eq!(self.expected_data, body);
            self.data_called = true;
            DataResult::Ok
        }
    }

    #[test]
    fn callbacks() {
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let domain = "some.domain";
        let from = "ship@sea.com";
        let to = vec!["fish@sea.com".to_owned(), "seaweed@sea.com".to_owned()];
        let data = vec![
            b"Hello 8bit world \x40\x7f\r\n" as &[u8],
            b"..Hello again\r\n" as &[u8],
        ];
        let expected_data = b"Hello 8bit world \x40\x7f\r\n.Hello again\r\n".to_vec();
        let mut handler = TestHandler {
            ip,
            domain: domain.to_owned(),
            from: from.to_owned(),
            to: to.clone(),
            is8bit: true,
            expected_data,
            helo_called: false,
            mail_called: false,
            rcpt_called: false,
            data_called: false,
        };
        let mut session = SessionBuilder::new("server.domain").build(ip, &mut handler);
        let helo = format!("helo {}\r\n", domain).into_bytes();
        session.process(&helo);
        let mail = format!("mail from:<{}> body=8bitmime\r\n", from).into_bytes();
        session.process(&mail);
        let rcpt0 = format!("rcpt to:<{}>\r\n", &to[0]).into_bytes();
        let rcpt1 = format!("rcpt to:<{}>\r\n", &to[1]).into_bytes();
        session.process(&rcpt0);
        session.process(&rcpt1);
        session.process(b"data\r\n");
        for line in data {
            session.process(line);
        }
        let res = session.process(b".\r\n");
        assert_eq!(res.code, 250);
        drop(session);
        assert!(handler.helo_called);
        assert!(handler.mail_called);
        assert!(handler.rcpt_called);
        assert!(handler.data_called);
    }

    #[test]
    fn data_result_codes() {
        assert_eq!(Response::from(DataResult::Ok).code, 250);
        let rejected = Response::from(DataResult::Rejected("Message rejected".to_owned()));
        assert_eq!(rejected.code, 554);
        assert!(rejected.is_error);
        let temporary = Response::from(DataResult::TemporaryFailure("Try later".to_owned()));
        assert_eq!(temporary.code, 451);
        assert!(temporary.is_error);
    }
}
