use log::trace;
use std::io;
use std::io::Write;

//------ Responses -------------------------------------------------------------

pub(crate) const MISSING_PARAMETER: Response =
    Response::constant(502, "Missing parameter", true, Action::Reply);
pub(crate) const SYNTAX_ERROR: Response =
    Response::constant(500, "Syntax error", true, Action::Reply);
pub(crate) const EMPTY_RESPONSE: Response = Response::empty();
pub(crate) const START_TLS: Response =
    Response::constant(220, "Ready to start TLS", false, Action::UpgradeTls);
pub(crate) const GOODBYE: Response = Response::constant(221, "Goodbye", false, Action::Close);
pub(crate) const AUTH_OK: Response =
    Response::constant(235, "Authentication succeeded", false, Action::Reply);
pub(crate) const OK: Response = Response::constant(250, "OK", false, Action::Reply);
pub(crate) const VERIFY_RESPONSE: Response =
    Response::constant(252, "Maybe", false, Action::Reply);
pub(crate) const EMPTY_CHALLENGE: Response = Response::constant(334, "", false, Action::Reply);
// base64("Username:")
pub(crate) const USERNAME_CHALLENGE: Response =
    Response::constant(334, "VXNlcm5hbWU6", false, Action::Reply);
// base64("Password:")
pub(crate) const PASSWORD_CHALLENGE: Response =
    Response::constant(334, "UGFzc3dvcmQ6", false, Action::Reply);
pub(crate) const START_DATA: Response = Response::constant(
    354,
    "Start mail input; end with <CRLF>.<CRLF>",
    false,
    Action::Reply,
);
pub(crate) const INVALID_STATE: Response = Response::constant(
    421,
    "Internal service error, closing connection",
    true,
    Action::Close,
);
pub(crate) const NO_SERVICE: Response = Response::constant(
    421,
    "Service not available, closing connection",
    true,
    Action::Close,
);
pub(crate) const TOO_MANY_RECIPIENTS: Response =
    Response::constant(452, "Too many recipients", true, Action::Reply);
pub(crate) const TEMP_AUTH_FAILURE: Response =
    Response::constant(454, "Temporary authentication failure", true, Action::Reply);
pub(crate) const AUTH_CANCELLED: Response =
    Response::constant(501, "Authentication cancelled", true, Action::Reply);
pub(crate) const BAD_AUTH_RESPONSE: Response =
    Response::constant(501, "Cannot decode response", true, Action::Reply);
pub(crate) const AUTH_NOT_ENABLED: Response =
    Response::constant(502, "Authentication not enabled", true, Action::Reply);
pub(crate) const BAD_SEQUENCE_COMMANDS: Response =
    Response::constant(503, "Bad sequence of commands", true, Action::Reply);
pub(crate) const ALREADY_AUTHENTICATED: Response =
    Response::constant(503, "Already authenticated", true, Action::Reply);
pub(crate) const UNKNOWN_MECHANISM: Response =
    Response::constant(504, "Unrecognized authentication type", true, Action::Reply);
pub(crate) const AUTHENTICATION_REQUIRED: Response =
    Response::constant(530, "Authentication required", true, Action::Reply);
pub(crate) const INVALID_CREDENTIALS: Response =
    Response::constant(535, "Invalid credentials", true, Action::Reply);
pub(crate) const ENCRYPTION_REQUIRED: Response = Response::constant(
    538,
    "Encryption required for requested authentication mechanism",
    true,
    Action::Reply,
);
pub(crate) const NO_MAILBOX: Response =
    Response::constant(550, "Mailbox unavailable", true, Action::Reply);
pub(crate) const BAD_HELLO: Response = Response::constant(550, "Bad HELO", true, Action::Reply);
pub(crate) const MESSAGE_TOO_BIG: Response = Response::constant(
    552,
    "Message exceeds fixed maximum message size",
    true,
    Action::Reply,
);
pub(crate) const BAD_MAILBOX: Response =
    Response::constant(553, "Mailbox name not allowed", true, Action::Reply);

//------ Types -----------------------------------------------------------------

/// Response contains a code and message to be sent back to the client
#[derive(Clone, Debug)]
pub struct Response {
    /// The three digit response code
    pub code: u16,
    message: Message,
    /// Is the response an error response?
    pub is_error: bool,
    /// The action to take after sending the response to the client
    pub action: Action,
}

#[derive(Clone, Debug)]
pub(crate) enum Message {
    Dynamic(String, Vec<String>),
    Fixed(&'static str),
    Empty,
}

/// Action indicates the recommended action to take on a response
#[derive(PartialEq, Clone, Debug)]
pub enum Action {
    /// Send the response and close the connection
    Close,
    /// Upgrade the connection to use TLS
    UpgradeTls,
    /// Do not reply, wait for the client to send more data
    NoReply,
    /// Send a reply and keep the connection open
    Reply,
}

impl Response {
    // A response that can be used in const definitions
    pub(crate) const fn constant(
        code: u16,
        message: &'static str,
        is_error: bool,
        action: Action,
    ) -> Self {
        Self {
            code,
            message: Message::Fixed(message),
            is_error,
            action,
        }
    }

    // An empty response
    pub(crate) const fn empty() -> Self {
        Self {
            code: 0,
            message: Message::Empty,
            is_error: false,
            action: Action::NoReply,
        }
    }

    // A response that is built dynamically and can be a multiline response
    pub(crate) fn dynamic(code: u16, head: String, tail: Vec<String>) -> Self {
        Self {
            code,
            message: Message::Dynamic(head, tail),
            is_error: !(200..400).contains(&code),
            action: Action::Reply,
        }
    }

    /// A single line response with a message chosen at runtime
    pub fn custom<S: Into<String>>(code: u16, message: S) -> Self {
        Self::dynamic(code, message.into(), Vec::new())
    }

    /// The first line of the response text, without the code
    pub fn text(&self) -> &str {
        match self.message {
            Message::Dynamic(ref head, _) => head,
            Message::Fixed(s) => s,
            Message::Empty => "",
        }
    }

    /// Write the response to the given writer
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        match self.message {
            Message::Dynamic(ref head, ref tail) => {
                if tail.is_empty() {
                    write!(out, "{} {}\r\n", self.code, head)?;
                } else {
                    write!(out, "{}-{}\r\n", self.code, head)?;
                    for (i, line) in tail.iter().enumerate() {
                        if i < tail.len() - 1 {
                            write!(out, "{}-{}\r\n", self.code, line)?;
                        } else {
                            write!(out, "{} {}\r\n", self.code, line)?;
                        }
                    }
                }
            }
            Message::Fixed(s) => write!(out, "{} {}\r\n", self.code, s)?,
            Message::Empty => (),
        };
        Ok(())
    }

    // Log the response
    pub(crate) fn log(&self) {
        match self.message {
            Message::Empty => (),
            _ => {
                let mut buf = Vec::new();
                let _ = self.write_to(&mut buf);
                trace!("< {}", String::from_utf8_lossy(&buf).trim_end());
            }
        }
    }
}
