use log::debug;
use snafu::prelude::*;

/// Optional identities attached to every forwarded message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOverrides {
    pub source_arn: Option<String>,
    pub from_arn: Option<String>,
    pub return_path_arn: Option<String>,
}

/// One message as handed to a `Provider`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest<'a> {
    /// `None` for the null reverse path
    pub sender: Option<&'a str>,
    pub recipients: &'a [String],
    pub body: &'a [u8],
    pub routing: &'a RoutingOverrides,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ForwardError {
    #[snafu(display("Message rejected: {}", detail))]
    Rejected { detail: String },
    #[snafu(display("Mail-From domain not verified: {}", detail))]
    UnverifiedSender { detail: String },
    #[snafu(display("Configuration set does not exist: {}", detail))]
    ConfigurationMissing { detail: String },
    #[snafu(display("Cannot reach provider: {}", detail))]
    Transport { detail: String },
}

impl ForwardError {
    /// Retrying the same message will fail again
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ForwardError::Transport { .. })
    }
}

/// An email API that accepts raw MIME messages
pub trait Provider: Send + Sync {
    /// Send one message, returning the message id given by the provider
    fn send_raw(&self, request: &ForwardRequest) -> Result<String, ForwardError>;
}

pub struct Forwarder {
    provider: Box<dyn Provider>,
    routing: RoutingOverrides,
}

impl Forwarder {
    pub fn new(provider: Box<dyn Provider>, routing: RoutingOverrides) -> Self {
        Self { provider, routing }
    }

    // Exactly one provider call per message, failures are returned not retried
    pub fn forward(
        &self,
        sender: &str,
        recipients: &[String],
        body: &[u8],
    ) -> Result<String, ForwardError> {
        let request = ForwardRequest {
            sender: Some(sender).filter(|s| !s.is_empty()),
            recipients,
            body,
            routing: &self.routing,
        };
        debug!(
            "forwarding {} bytes from <{}> to {} recipients",
            body.len(),
            sender,
            recipients.len()
        );
        self.provider.send_raw(&request)
    }
}

//----- Tests ------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    // What a provider was asked to send
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct Sent {
        pub sender: Option<String>,
        pub recipients: Vec<String>,
        pub body: Vec<u8>,
        pub routing: RoutingOverrides,
    }

    // A provider that records requests and answers from a script
    #[derive(Clone, Default)]
    pub(crate) struct MockProvider {
        pub sent: Arc<Mutex<Vec<Sent>>>,
        pub failures: Arc<Mutex<Vec<ForwardError>>>,
    }

    impl MockProvider {
        pub fn fail_next(&self, err: ForwardError) {
            self.failures.lock().unwrap().push(err);
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Provider for MockProvider {
        fn send_raw(&self, request: &ForwardRequest) -> Result<String, ForwardError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent {
                sender: request.sender.map(str::to_owned),
                recipients: request.recipients.to_vec(),
                body: request.body.to_vec(),
                routing: request.routing.clone(),
            });
            match self.failures.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok(format!("message-{}", sent.len())),
            }
        }
    }

    fn recipients() -> Vec<String> {
        vec!["b@y.com".to_owned(), "c@y.com".to_owned()]
    }

    #[test]
    fn forwards_verbatim() {
        let provider = MockProvider::default();
        let forwarder = Forwarder::new(Box::new(provider.clone()), RoutingOverrides::default());
        let id = forwarder
            .forward("a@x.com", &recipients(), b"Subject: hi\r\n\r\nbody")
            .unwrap();
        assert_eq!(id, "message-1");
        assert_eq!(
            provider.sent(),
            vec![Sent {
                sender: Some("a@x.com".to_owned()),
                recipients: recipients(),
                body: b"Subject: hi\r\n\r\nbody".to_vec(),
                routing: RoutingOverrides::default(),
            }]
        );
    }

    #[test]
    fn null_sender_omitted() {
        let provider = MockProvider::default();
        let forwarder = Forwarder::new(Box::new(provider.clone()), RoutingOverrides::default());
        forwarder.forward("", &recipients(), b"x").unwrap();
        assert_eq!(provider.sent()[0].sender, None);
    }

    #[test]
    fn routing_overrides_attached() {
        let provider = MockProvider::default();
        let routing = RoutingOverrides {
            source_arn: Some("arn:aws:ses:eu-west-1:1:identity/x.com".to_owned()),
            from_arn: None,
            return_path_arn: Some("arn:aws:ses:eu-west-1:1:identity/y.com".to_owned()),
        };
        let forwarder = Forwarder::new(Box::new(provider.clone()), routing.clone());
        forwarder.forward("a@x.com", &recipients(), b"x").unwrap();
        assert_eq!(provider.sent()[0].routing, routing);
    }

    #[test]
    fn one_call_per_failure() {
        let provider = MockProvider::default();
        provider.fail_next(ForwardError::Transport {
            detail: "connection reset".to_owned(),
        });
        let forwarder = Forwarder::new(Box::new(provider.clone()), RoutingOverrides::default());
        let err = forwarder.forward("a@x.com", &recipients(), b"x").unwrap_err();
        assert!(!err.is_permanent());
        assert_eq!(provider.sent().len(), 1);
    }

    #[test]
    fn permanence() {
        let permanent = [
            ForwardError::Rejected {
                detail: String::new(),
            },
            ForwardError::UnverifiedSender {
                detail: String::new(),
            },
            ForwardError::ConfigurationMissing {
                detail: String::new(),
            },
        ];
        assert!(permanent.iter().all(ForwardError::is_permanent));
        let err = ForwardError::Rejected {
            detail: "Email address is not verified".to_owned(),
        };
        assert_eq!(err.to_string(), "Message rejected: Email address is not verified");
    }
}
