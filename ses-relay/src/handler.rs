use crate::auth::AuthGate;
use crate::forward::{ForwardError, Forwarder};
use crate::metrics::{self, Metrics};
use log::{debug, info, warn};
use relay_server::{AuthResult, DataResult, Envelope, Handler};
use std::net::IpAddr;
use std::sync::Arc;

/// Connects each SMTP session to the shared gate and forwarder
#[derive(Clone)]
pub struct RelayHandler {
    gate: Arc<AuthGate>,
    forwarder: Arc<Forwarder>,
    metrics: Metrics,
}

impl RelayHandler {
    pub fn new(gate: AuthGate, forwarder: Forwarder, metrics: Metrics) -> Self {
        Self {
            gate: Arc::new(gate),
            forwarder: Arc::new(forwarder),
            metrics,
        }
    }
}

// SMTP replies are a single line
fn reply_text(err: &ForwardError) -> String {
    err.to_string().replace(|c: char| c == '\r' || c == '\n', " ")
}

impl Handler for RelayHandler {
    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        password: &str,
    ) -> AuthResult {
        let res = self
            .gate
            .authenticate(authorization_id, authentication_id, password);
        if res == AuthResult::Ok {
            info!("authenticated as {}", authentication_id);
            self.metrics.incr(metrics::AUTH_OK);
        } else {
            warn!("authentication failed for {}", authentication_id);
            self.metrics.incr(metrics::AUTH_FAILED);
        }
        res
    }

    fn auth_anonymous(&mut self, ip: IpAddr) -> AuthResult {
        let res = self.gate.authenticate_anonymous();
        if res != AuthResult::Ok {
            debug!("({}) mail without authentication refused", ip);
        }
        res
    }

    fn data(&mut self, envelope: &Envelope, body: &[u8]) -> DataResult {
        info!(
            "({}) message from: <{}> to: {}",
            envelope.ip,
            envelope.reverse_path,
            envelope.forward_path.join(", ")
        );
        match self
            .forwarder
            .forward(&envelope.reverse_path, &envelope.forward_path, body)
        {
            Ok(message_id) => {
                info!("({}) forwarded as {}", envelope.ip, message_id);
                self.metrics.incr(metrics::FORWARD_OK);
                DataResult::Ok
            }
            Err(err) if err.is_permanent() => {
                warn!("({}) {}", envelope.ip, err);
                self.metrics.incr(metrics::FORWARD_REJECTED);
                DataResult::Rejected(reply_text(&err))
            }
            Err(err) => {
                warn!("({}) {}", envelope.ip, err);
                self.metrics.incr(metrics::FORWARD_TEMPORARY);
                DataResult::TemporaryFailure(reply_text(&err))
            }
        }
    }
}

//----- Tests ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthPolicy;
    use crate::forward::tests::{MockProvider, Sent};
    use crate::forward::RoutingOverrides;
    use pretty_assertions::assert_eq;
    use relay_server::{AuthMechanism, Server};
    use relay_session::{Session, SessionBuilder};
    use std::io::{BufRead, BufReader, Write};
    use std::net::{Ipv4Addr, TcpStream};

    fn handler(policy: AuthPolicy, provider: &MockProvider) -> RelayHandler {
        let gate = AuthGate::new(policy, Some("user".to_owned()), Some("secret".to_owned()));
        let forwarder = Forwarder::new(Box::new(provider.clone()), RoutingOverrides::default());
        RelayHandler::new(gate, forwarder, Metrics::default())
    }

    fn session(policy: AuthPolicy, provider: &MockProvider) -> Session<RelayHandler> {
        let mut builder = SessionBuilder::new("localhost");
        if policy != AuthPolicy::Disabled {
            builder
                .enable_auth(AuthMechanism::Plain)
                .enable_auth(AuthMechanism::Login)
                .allow_insecure_auth();
        }
        builder.build(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            handler(policy, provider),
        )
    }

    // Run a transaction and return the final reply code
    fn transaction(
        session: &mut Session<RelayHandler>,
        from: &str,
        to: &[&str],
        body: &[&[u8]],
    ) -> u16 {
        let res = session.process(format!("MAIL FROM:<{}>\r\n", from).as_bytes());
        if res.is_error {
            return res.code;
        }
        for rcpt in to {
            session.process(format!("RCPT TO:<{}>\r\n", rcpt).as_bytes());
        }
        let res = session.process(b"DATA\r\n");
        if res.is_error {
            return res.code;
        }
        for line in body {
            session.process(line);
        }
        session.process(b".\r\n").code
    }

    #[test]
    fn forwards_message() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::CredentialRequired, &provider);
        session.process(b"EHLO client\r\n");
        assert_eq!(session.process(b"AUTH PLAIN AHVzZXIAc2VjcmV0\r\n").code, 235);
        let code = transaction(
            &mut session,
            "a@x.com",
            &["b@y.com", "c@y.com"],
            &[b"Subject: hi\r\n", b"\r\n", b"body\r\n"],
        );
        assert_eq!(code, 250);
        assert_eq!(
            provider.sent(),
            vec![Sent {
                sender: Some("a@x.com".to_owned()),
                recipients: vec!["b@y.com".to_owned(), "c@y.com".to_owned()],
                body: b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
                routing: RoutingOverrides::default(),
            }]
        );
    }

    #[test]
    fn auth_required() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::CredentialRequired, &provider);
        session.process(b"EHLO client\r\n");
        let code = transaction(&mut session, "a@x.com", &["b@y.com"], &[b"x\r\n"]);
        assert_eq!(code, 530);
        assert_eq!(session.process(b"AUTH PLAIN AHVzZXIAd3Jvbmc=\r\n").code, 535);
        assert!(provider.sent().is_empty());
    }

    #[test]
    fn auth_login() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::CredentialRequired, &provider);
        session.process(b"EHLO client\r\n");
        assert_eq!(session.process(b"AUTH LOGIN\r\n").code, 334);
        assert_eq!(session.process(b"dXNlcg==\r\n").code, 334);
        assert_eq!(session.process(b"c2VjcmV0\r\n").code, 235);
        let code = transaction(&mut session, "a@x.com", &["b@y.com"], &[b"x\r\n"]);
        assert_eq!(code, 250);
    }

    #[test]
    fn anonymous_allowed() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::AnonymousAllowed, &provider);
        session.process(b"EHLO client\r\n");
        let code = transaction(&mut session, "a@x.com", &["b@y.com"], &[b"x\r\n"]);
        assert_eq!(code, 250);
        assert_eq!(provider.sent().len(), 1);
    }

    #[test]
    fn auth_disabled() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::Disabled, &provider);
        session.process(b"EHLO client\r\n");
        assert_eq!(session.process(b"AUTH PLAIN AHVzZXIAc2VjcmV0\r\n").code, 502);
        let code = transaction(&mut session, "", &["b@y.com"], &[b"x\r\n"]);
        assert_eq!(code, 250);
        assert_eq!(provider.sent()[0].sender, None);
    }

    #[test]
    fn rejected_then_accepted() {
        let provider = MockProvider::default();
        provider.fail_next(ForwardError::Rejected {
            detail: "Email address is not verified.".to_owned(),
        });
        let mut session = session(AuthPolicy::Disabled, &provider);
        session.process(b"HELO client\r\n");
        session.process(b"MAIL FROM:<a@x.com>\r\n");
        session.process(b"RCPT TO:<b@y.com>\r\n");
        session.process(b"DATA\r\n");
        session.process(b"first\r\n");
        let res = session.process(b".\r\n");
        assert_eq!(res.code, 554);
        assert_eq!(res.text(), "Message rejected: Email address is not verified.");
        // The session is still usable and the next message starts afresh
        let code = transaction(&mut session, "a@x.com", &["d@y.com"], &[b"second\r\n"]);
        assert_eq!(code, 250);
        let sent = provider.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].recipients, vec!["d@y.com".to_owned()]);
        assert_eq!(sent[1].body, b"second\r\n".to_vec());
    }

    #[test]
    fn temporary_failure() {
        let provider = MockProvider::default();
        provider.fail_next(ForwardError::Transport {
            detail: "dispatch failure\r\ntimeout".to_owned(),
        });
        let mut session = session(AuthPolicy::Disabled, &provider);
        session.process(b"HELO client\r\n");
        session.process(b"MAIL FROM:<a@x.com>\r\n");
        session.process(b"RCPT TO:<b@y.com>\r\n");
        session.process(b"DATA\r\n");
        let res = session.process(b".\r\n");
        assert_eq!(res.code, 451);
        assert_eq!(res.text(), "Cannot reach provider: dispatch failure  timeout");
    }

    #[test]
    fn unverified_sender() {
        let provider = MockProvider::default();
        provider.fail_next(ForwardError::UnverifiedSender {
            detail: "x.com".to_owned(),
        });
        let mut session = session(AuthPolicy::Disabled, &provider);
        session.process(b"HELO client\r\n");
        let code = transaction(&mut session, "a@x.com", &["b@y.com"], &[b"x\r\n"]);
        assert_eq!(code, 554);
    }

    #[test]
    fn recipient_limit() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::Disabled, &provider);
        session.process(b"HELO client\r\n");
        session.process(b"MAIL FROM:<a@x.com>\r\n");
        for i in 0..50 {
            let res = session.process(format!("RCPT TO:<r{}@y.com>\r\n", i).as_bytes());
            assert_eq!(res.code, 250);
        }
        assert_eq!(session.process(b"RCPT TO:<r50@y.com>\r\n").code, 452);
        session.process(b"DATA\r\n");
        assert_eq!(session.process(b".\r\n").code, 250);
        assert_eq!(provider.sent()[0].recipients.len(), 50);
    }

    #[test]
    fn oversized_message_not_forwarded() {
        let provider = MockProvider::default();
        let mut session = session(AuthPolicy::Disabled, &provider);
        session.process(b"HELO client\r\n");
        session.process(b"MAIL FROM:<a@x.com>\r\n");
        session.process(b"RCPT TO:<b@y.com>\r\n");
        session.process(b"DATA\r\n");
        let mut line = vec![b'x'; 998];
        line.extend_from_slice(b"\r\n");
        for _ in 0..1100 {
            session.process(&line);
        }
        assert_eq!(session.process(b".\r\n").code, 552);
        assert!(provider.sent().is_empty());
    }

    fn reply(reader: &mut BufReader<TcpStream>) -> String {
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return line;
            }
        }
    }

    #[test]
    fn relay_over_tcp() {
        let provider = MockProvider::default();
        let mut server = Server::new(handler(AuthPolicy::CredentialRequired, &provider));
        server
            .with_auth(AuthMechanism::Plain)
            .with_auth(AuthMechanism::Login)
            .with_insecure_auth(true)
            .with_addr("127.0.0.1:0")
            .unwrap();
        let running = server.serve().unwrap();

        let mut stream = TcpStream::connect(running.local_addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let conversation: [(&[u8], &str); 9] = [
            (b"EHLO client\r\n", "250 AUTH PLAIN LOGIN"),
            (b"MAIL FROM:<a@x.com>\r\n", "530"),
            (b"AUTH PLAIN AHVzZXIAc2VjcmV0\r\n", "235"),
            (b"MAIL FROM:<a@x.com>\r\n", "250"),
            (b"RCPT TO:<b@y.com>\r\n", "250"),
            (b"DATA\r\n", "354"),
            (b"Subject: hi\r\n\r\nbody\r\n.\r\n", "250"),
            (b"RSET\r\n", "250"),
            (b"QUIT\r\n", "221"),
        ];
        assert!(reply(&mut reader).starts_with("220 localhost ESMTP"));
        for (line, expected) in conversation.iter() {
            stream.write_all(line).unwrap();
            let answer = reply(&mut reader);
            assert!(answer.starts_with(expected), "{} after {:?}", answer, line);
        }
        running.stop().unwrap();

        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, b"Subject: hi\r\n\r\nbody\r\n".to_vec());
    }
}
