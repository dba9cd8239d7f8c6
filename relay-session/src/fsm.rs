use crate::auth::AuthMechanism;
use crate::cmd::Cmd;
use crate::parser::{decode_base64_string, decode_sasl_plain, parse, trim_line_ending};
use crate::response::*;
use crate::{AuthResult, Envelope, Handler};
use either::{Either, Left, Right};
use log::{debug, warn};
use std::fmt;
use std::mem;
use std::net::IpAddr;
use ternop::ternary;

//------ Configuration ---------------------------------------------------------

// Settings shared by every session built from the same SessionBuilder
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub name: String,
    pub start_tls_extension: bool,
    pub auth_mechanisms: Vec<AuthMechanism>,
    pub allow_insecure_auth: bool,
    pub max_message_size: usize,
    pub max_recipients: usize,
}

//------ State -----------------------------------------------------------------

/// The state of a session without the data held in the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SmtpState {
    Invalid,
    Idle,
    Hello,
    Auth,
    Mail,
    Rcpt,
    Data,
}

#[derive(Debug)]
enum States {
    Invalid,
    Idle,
    Hello(Hello),
    Auth(Auth),
    Mail(Mail),
    Rcpt(Rcpt),
    Data(Data),
}

#[derive(Debug)]
struct Hello {
    domain: String,
}

#[derive(Debug)]
enum AuthStage {
    PlainResponse,
    LoginUsername,
    LoginPassword { username: String },
}

#[derive(Debug)]
struct Auth {
    hello: Hello,
    stage: AuthStage,
}

#[derive(Debug)]
struct Mail {
    hello: Hello,
    reverse_path: String,
    is8bit: bool,
}

#[derive(Debug)]
struct Rcpt {
    mail: Mail,
    forward_path: Vec<String>,
}

struct Data {
    rcpt: Rcpt,
    body: Vec<u8>,
    overflow: bool,
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Data{{rcpt: {:?}, size: {}, overflow: {}}}",
            self.rcpt,
            self.body.len(),
            self.overflow
        )
    }
}

impl States {
    fn id(&self) -> SmtpState {
        match self {
            States::Invalid => SmtpState::Invalid,
            States::Idle => SmtpState::Idle,
            States::Hello(_) => SmtpState::Hello,
            States::Auth(_) => SmtpState::Auth,
            States::Mail(_) => SmtpState::Mail,
            States::Rcpt(_) => SmtpState::Rcpt,
            States::Data(_) => SmtpState::Data,
        }
    }

    // Drop any transaction in progress
    fn reset(self) -> States {
        match self {
            States::Invalid => States::Invalid,
            States::Idle => States::Idle,
            States::Hello(hello) => States::Hello(hello),
            States::Auth(auth) => States::Hello(auth.hello),
            States::Mail(mail) => States::Hello(mail.hello),
            States::Rcpt(rcpt) => States::Hello(rcpt.mail.hello),
            States::Data(data) => States::Hello(data.rcpt.mail.hello),
        }
    }
}

// A transaction goes back to Mail if it holds no recipients
fn rcpt_state(rcpt: Rcpt) -> States {
    ternary!(
        rcpt.forward_path.is_empty(),
        States::Mail(rcpt.mail),
        States::Rcpt(rcpt)
    )
}

//------ StateMachine ----------------------------------------------------------

#[derive(PartialEq)]
enum TlsState {
    Unavailable,
    Available,
    Active,
}

pub(crate) struct StateMachine {
    ip: IpAddr,
    config: Config,
    current: States,
    tls: TlsState,
    authenticated: bool,
}

impl StateMachine {
    pub(crate) fn new(ip: IpAddr, config: Config) -> Self {
        let tls = ternary!(
            config.start_tls_extension,
            TlsState::Available,
            TlsState::Unavailable
        );
        Self {
            ip,
            config,
            current: States::Idle,
            tls,
            authenticated: false,
        }
    }

    pub(crate) fn current_state(&self) -> SmtpState {
        self.current.id()
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn server_name(&self) -> &str {
        &self.config.name
    }

    // STARTTLS has completed, the client must start again with EHLO
    pub(crate) fn tls_active(&mut self) {
        self.tls = TlsState::Active;
        self.authenticated = false;
        self.current = States::Idle;
    }

    // Turn a line into a command, or consume it as part of the message body
    pub(crate) fn process_line<'a>(&mut self, line: &'a [u8]) -> Either<Cmd<'a>, Response> {
        match self.current {
            States::Data(ref mut data) => {
                let content = trim_line_ending(line);
                if content == b"." {
                    return Left(Cmd::DataEnd);
                }
                let unstuffed = ternary!(content.starts_with(b"."), &line[1..], line);
                if data.overflow {
                    return Right(EMPTY_RESPONSE);
                }
                if data.body.len() + unstuffed.len() > self.config.max_message_size {
                    debug!(
                        "({}) message exceeds {} bytes, discarding",
                        self.ip, self.config.max_message_size
                    );
                    data.overflow = true;
                    data.body = Vec::new();
                } else {
                    data.body.extend_from_slice(unstuffed);
                }
                Right(EMPTY_RESPONSE)
            }
            States::Auth(_) => {
                let response = trim_line_ending(line);
                // The client may give up on the exchange and leave
                ternary!(
                    response.eq_ignore_ascii_case(b"quit"),
                    Left(Cmd::Quit),
                    Left(Cmd::AuthResponse { response })
                )
            }
            _ => match parse(line) {
                Ok(cmd) => Left(cmd),
                Err(res) => Right(res),
            },
        }
    }

    // Respond and change state with the given command
    pub(crate) fn command(&mut self, handler: &mut dyn Handler, cmd: Cmd) -> Response {
        let last_state = mem::replace(&mut self.current, States::Invalid);
        let (response, next_state) = match (last_state, cmd) {
            (States::Invalid, _) => (INVALID_STATE, States::Invalid),
            (_, Cmd::Quit) => (GOODBYE, States::Invalid),
            (States::Auth(auth), Cmd::AuthResponse { response }) => {
                self.auth_response(handler, auth, response)
            }
            (state, Cmd::Noop) => (OK, state),
            (state, Cmd::Helo { domain }) => self.helo(handler, state, domain, false),
            (state, Cmd::Ehlo { domain }) => self.helo(handler, state, domain, true),
            (state, Cmd::Rset) => {
                handler.rset();
                (OK, state.reset())
            }
            (States::Hello(hello), Cmd::Vrfy) => (VERIFY_RESPONSE, States::Hello(hello)),
            (States::Hello(hello), Cmd::StartTls) => self.start_tls(hello),
            (
                States::Hello(hello),
                Cmd::AuthPlain {
                    authorization_id,
                    authentication_id,
                    password,
                },
            ) => match self.check_auth(AuthMechanism::Plain) {
                Some(res) => (res, States::Hello(hello)),
                None => {
                    let res = handler.auth_plain(&authorization_id, &authentication_id, &password);
                    self.auth_done(res, hello)
                }
            },
            (States::Hello(hello), Cmd::AuthPlainEmpty) => {
                match self.check_auth(AuthMechanism::Plain) {
                    Some(res) => (res, States::Hello(hello)),
                    None => (
                        EMPTY_CHALLENGE,
                        States::Auth(Auth {
                            hello,
                            stage: AuthStage::PlainResponse,
                        }),
                    ),
                }
            }
            (States::Hello(hello), Cmd::AuthPlainUndecodable) => {
                let res = self
                    .check_auth(AuthMechanism::Plain)
                    .unwrap_or(BAD_AUTH_RESPONSE);
                (res, States::Hello(hello))
            }
            (States::Hello(hello), Cmd::AuthLogin { initial }) => {
                match self.check_auth(AuthMechanism::Login) {
                    Some(res) => (res, States::Hello(hello)),
                    None => self.auth_login(hello, initial),
                }
            }
            (States::Hello(hello), Cmd::AuthUnknown) => {
                let res = ternary!(
                    self.config.auth_mechanisms.is_empty(),
                    AUTH_NOT_ENABLED,
                    UNKNOWN_MECHANISM
                );
                (res, States::Hello(hello))
            }
            (
                States::Hello(hello),
                Cmd::Mail {
                    reverse_path,
                    is8bit,
                    size,
                },
            ) => self.mail(handler, hello, reverse_path, is8bit, size),
            (States::Mail(mail), Cmd::Rcpt { forward_path }) => {
                let rcpt = Rcpt {
                    mail,
                    forward_path: Vec::with_capacity(4),
                };
                self.rcpt(handler, rcpt, forward_path)
            }
            (States::Rcpt(rcpt), Cmd::Rcpt { forward_path }) => {
                self.rcpt(handler, rcpt, forward_path)
            }
            (States::Rcpt(rcpt), Cmd::Data) => (
                START_DATA,
                States::Data(Data {
                    rcpt,
                    body: Vec::with_capacity(4096),
                    overflow: false,
                }),
            ),
            (States::Data(data), Cmd::DataEnd) => self.data_end(handler, data),
            (current, _) => (BAD_SEQUENCE_COMMANDS, current),
        };
        debug!("({}) * {:?}", self.ip, next_state.id());
        self.current = next_state;
        response
    }

    fn helo(
        &mut self,
        handler: &mut dyn Handler,
        state: States,
        domain: &str,
        is_esmtp: bool,
    ) -> (Response, States) {
        let res = Response::from(handler.helo(self.ip, domain));
        if res.is_error {
            return (res, state);
        }
        let hello = Hello {
            domain: domain.to_owned(),
        };
        let res = ternary!(is_esmtp, self.ehlo_response(), res);
        (res, States::Hello(hello))
    }

    fn ehlo_response(&self) -> Response {
        let mut extensions = vec![
            "8BITMIME".to_owned(),
            format!("SIZE {}", self.config.max_message_size),
        ];
        if self.tls == TlsState::Available {
            extensions.push("STARTTLS".to_owned());
        }
        if self.auth_allowed() {
            let names: Vec<&str> = self
                .config
                .auth_mechanisms
                .iter()
                .map(|m| m.name())
                .collect();
            extensions.push(format!("AUTH {}", names.join(" ")));
        }
        Response::dynamic(
            250,
            format!("{} offers extensions:", self.config.name),
            extensions,
        )
    }

    fn start_tls(&mut self, hello: Hello) -> (Response, States) {
        match self.tls {
            TlsState::Available => (START_TLS, States::Idle),
            _ => {
                warn!("({}) STARTTLS received when not enabled", self.ip);
                (BAD_SEQUENCE_COMMANDS, States::Hello(hello))
            }
        }
    }

    //--- Authentication ---

    // Authentication is offered once the connection is secure enough
    fn auth_allowed(&self) -> bool {
        !self.config.auth_mechanisms.is_empty()
            && (self.tls == TlsState::Active || self.config.allow_insecure_auth)
    }

    // Returns an error response if the mechanism cannot be used right now
    fn check_auth(&self, mechanism: AuthMechanism) -> Option<Response> {
        if self.config.auth_mechanisms.is_empty() {
            Some(AUTH_NOT_ENABLED)
        } else if self.authenticated {
            Some(ALREADY_AUTHENTICATED)
        } else if !self.config.auth_mechanisms.contains(&mechanism) {
            Some(UNKNOWN_MECHANISM)
        } else if !self.auth_allowed() {
            Some(ENCRYPTION_REQUIRED)
        } else {
            None
        }
    }

    fn auth_login(&mut self, hello: Hello, initial: Option<&[u8]>) -> (Response, States) {
        match initial {
            None => (
                USERNAME_CHALLENGE,
                States::Auth(Auth {
                    hello,
                    stage: AuthStage::LoginUsername,
                }),
            ),
            Some(initial) => match decode_base64_string(initial) {
                Some(username) => (
                    PASSWORD_CHALLENGE,
                    States::Auth(Auth {
                        hello,
                        stage: AuthStage::LoginPassword { username },
                    }),
                ),
                None => (BAD_AUTH_RESPONSE, States::Hello(hello)),
            },
        }
    }

    fn auth_response(
        &mut self,
        handler: &mut dyn Handler,
        auth: Auth,
        response: &[u8],
    ) -> (Response, States) {
        if response == b"*" {
            return (AUTH_CANCELLED, States::Hello(auth.hello));
        }
        match auth.stage {
            AuthStage::PlainResponse => match decode_sasl_plain(response) {
                Some(creds) => {
                    let res = handler.auth_plain(
                        &creds.authorization_id,
                        &creds.authentication_id,
                        &creds.password,
                    );
                    self.auth_done(res, auth.hello)
                }
                None => (BAD_AUTH_RESPONSE, States::Hello(auth.hello)),
            },
            AuthStage::LoginUsername => match decode_base64_string(response) {
                Some(username) => (
                    PASSWORD_CHALLENGE,
                    States::Auth(Auth {
                        hello: auth.hello,
                        stage: AuthStage::LoginPassword { username },
                    }),
                ),
                None => (BAD_AUTH_RESPONSE, States::Hello(auth.hello)),
            },
            AuthStage::LoginPassword { username } => match decode_base64_string(response) {
                Some(password) => {
                    let res = handler.auth_login(&username, &password);
                    self.auth_done(res, auth.hello)
                }
                None => (BAD_AUTH_RESPONSE, States::Hello(auth.hello)),
            },
        }
    }

    fn auth_done(&mut self, res: AuthResult, hello: Hello) -> (Response, States) {
        let res = Response::from(res);
        if !res.is_error {
            self.authenticated = true;
        }
        (res, States::Hello(hello))
    }

    //--- Mail transaction ---

    fn mail(
        &mut self,
        handler: &mut dyn Handler,
        hello: Hello,
        reverse_path: &str,
        is8bit: bool,
        size: Option<usize>,
    ) -> (Response, States) {
        if !self.config.auth_mechanisms.is_empty() && !self.authenticated {
            let anonymous = Response::from(handler.auth_anonymous(self.ip));
            if anonymous.is_error {
                return (AUTHENTICATION_REQUIRED, States::Hello(hello));
            }
        }
        if size.map_or(false, |s| s > self.config.max_message_size) {
            return (MESSAGE_TOO_BIG, States::Hello(hello));
        }
        let res = Response::from(handler.mail(self.ip, &hello.domain, reverse_path));
        if res.is_error {
            return (res, States::Hello(hello));
        }
        let mail = Mail {
            hello,
            reverse_path: reverse_path.to_owned(),
            is8bit,
        };
        (res, States::Mail(mail))
    }

    fn rcpt(
        &mut self,
        handler: &mut dyn Handler,
        mut rcpt: Rcpt,
        forward_path: &str,
    ) -> (Response, States) {
        if rcpt.forward_path.iter().any(|to| to == forward_path) {
            return (OK, rcpt_state(rcpt));
        }
        if rcpt.forward_path.len() >= self.config.max_recipients {
            return (TOO_MANY_RECIPIENTS, rcpt_state(rcpt));
        }
        let res = Response::from(handler.rcpt(forward_path));
        if !res.is_error {
            rcpt.forward_path.push(forward_path.to_owned());
        }
        (res, rcpt_state(rcpt))
    }

    fn data_end(&mut self, handler: &mut dyn Handler, data: Data) -> (Response, States) {
        let Data {
            rcpt,
            body,
            overflow,
        } = data;
        let Rcpt { mail, forward_path } = rcpt;
        // Whatever the outcome, the next transaction starts afresh
        if overflow {
            return (MESSAGE_TOO_BIG, States::Hello(mail.hello));
        }
        let envelope = Envelope {
            ip: self.ip,
            domain: mail.hello.domain.clone(),
            reverse_path: mail.reverse_path,
            forward_path,
            is8bit: mail.is8bit,
        };
        let res = Response::from(handler.data(&envelope, &body));
        (res, States::Hello(mail.hello))
    }
}
