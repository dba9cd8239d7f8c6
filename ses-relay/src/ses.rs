use crate::forward::{
    ConfigurationMissingSnafu, ForwardError, ForwardRequest, Provider, RejectedSnafu,
    TransportSnafu, UnverifiedSenderSnafu,
};
use anyhow::{Context, Result};
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_ses::config::{Credentials, Region};
use aws_sdk_ses::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ses::operation::send_raw_email::SendRawEmailError;
use aws_sdk_ses::primitives::Blob;
use aws_sdk_ses::types::RawMessage;
use aws_sdk_ses::Client;
use log::debug;
use std::fmt;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Where the SES client gets its AWS credentials from
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Keys given on the command line
    Static {
        access_key: String,
        secret_key: String,
    },
    /// The AWS default chain: environment, profile files, instance roles
    Ambient,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CredentialSource::Static { access_key, .. } => {
                write!(f, "Static {{ access_key: {}, secret_key: ** }}", access_key)
            }
            CredentialSource::Ambient => write!(f, "Ambient"),
        }
    }
}

/// Sends messages with the SES SendRawEmail call
pub struct SesProvider {
    runtime: Runtime,
    client: Client,
}

impl SesProvider {
    /// `timeout` bounds each SendRawEmail call, retries included
    pub fn new(region: &str, credentials: CredentialSource, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ses-client")
            .enable_all()
            .build()
            .context("Cannot start the SES client runtime")?;
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .timeout_config(timeout_config(timeout));
        if let CredentialSource::Static {
            access_key,
            secret_key,
        } = credentials
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "ses-relay",
            ));
        }
        let sdk_config = runtime.block_on(loader.load());
        let client = Client::new(&sdk_config);
        Ok(Self { runtime, client })
    }

    async fn send(&self, request: &ForwardRequest<'_>) -> Result<String, ForwardError> {
        let message = RawMessage::builder()
            .data(Blob::new(request.body))
            .build()
            .map_err(|err| {
                TransportSnafu {
                    detail: err.to_string(),
                }
                .build()
            })?;
        let routing = request.routing;
        let output = self
            .client
            .send_raw_email()
            .set_destinations(Some(request.recipients.to_vec()))
            .set_source(request.sender.map(str::to_owned))
            .raw_message(message)
            .set_source_arn(routing.source_arn.clone())
            .set_from_arn(routing.from_arn.clone())
            .set_return_path_arn(routing.return_path_arn.clone())
            .send()
            .await;
        match output {
            Ok(output) => Ok(output.message_id().to_owned()),
            Err(SdkError::ServiceError(err)) => Err(classify(err.into_err())),
            Err(err) => TransportSnafu {
                detail: DisplayErrorContext(&err).to_string(),
            }
            .fail(),
        }
    }
}

impl Provider for SesProvider {
    fn send_raw(&self, request: &ForwardRequest) -> Result<String, ForwardError> {
        self.runtime.block_on(self.send(request))
    }
}

fn timeout_config(timeout: Duration) -> TimeoutConfig {
    TimeoutConfig::builder()
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .operation_timeout(timeout)
        .build()
}

// Sort an SES error into a permanent or temporary failure
fn classify(err: SendRawEmailError) -> ForwardError {
    let detail = err
        .message()
        .or_else(|| err.code())
        .unwrap_or("unknown SES error")
        .to_owned();
    debug!("SES error: {:?}", err);
    match err {
        SendRawEmailError::MessageRejected(_) => RejectedSnafu { detail }.build(),
        SendRawEmailError::MailFromDomainNotVerifiedException(_) => {
            UnverifiedSenderSnafu { detail }.build()
        }
        SendRawEmailError::ConfigurationSetDoesNotExistException(_) => {
            ConfigurationMissingSnafu { detail }.build()
        }
        _ => TransportSnafu { detail }.build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ses::types::error::{
        AccountSendingPausedException, ConfigurationSetDoesNotExistException,
        MailFromDomainNotVerifiedException, MessageRejected,
    };
    use matches::assert_matches;

    #[test]
    fn message_rejected() {
        let err = SendRawEmailError::MessageRejected(
            MessageRejected::builder()
                .message("Email address is not verified.")
                .build(),
        );
        let classified = classify(err);
        assert!(classified.is_permanent());
        assert_matches!(
            classified,
            ForwardError::Rejected { ref detail } if detail == "Email address is not verified."
        );
    }

    #[test]
    fn unverified_sender() {
        let err = SendRawEmailError::MailFromDomainNotVerifiedException(
            MailFromDomainNotVerifiedException::builder()
                .message("not verified")
                .build(),
        );
        assert_matches!(classify(err), ForwardError::UnverifiedSender { .. });
    }

    #[test]
    fn configuration_missing() {
        let err = SendRawEmailError::ConfigurationSetDoesNotExistException(
            ConfigurationSetDoesNotExistException::builder()
                .message("no such set")
                .build(),
        );
        assert_matches!(classify(err), ForwardError::ConfigurationMissing { .. });
    }

    #[test]
    fn other_errors_are_temporary() {
        let err = SendRawEmailError::AccountSendingPausedException(
            AccountSendingPausedException::builder()
                .message("sending paused")
                .build(),
        );
        let classified = classify(err);
        assert!(!classified.is_permanent());
        assert_matches!(classified, ForwardError::Transport { .. });
    }

    #[test]
    fn calls_are_bounded() {
        let config = timeout_config(Duration::from_secs(30));
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(10)));
        let config = timeout_config(Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn secret_key_not_shown() {
        let credentials = CredentialSource::Static {
            access_key: "AKIDEXAMPLE".to_owned(),
            secret_key: "wJalrXUtnFEMI".to_owned(),
        };
        let shown = format!("{:?}", credentials);
        assert!(shown.contains("AKIDEXAMPLE"));
        assert!(!shown.contains("wJalrXUtnFEMI"));
    }
}
