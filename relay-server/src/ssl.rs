use crate::err::Error;
use cfg_if::cfg_if;
use std::net::TcpStream;

/// `SslConfig` is used to configure the STARTTLS configuration of the server
#[derive(Debug, Clone)]
pub enum SslConfig {
    /// Do not support STARTTLS
    None,
    /// Use a self-signed certificate for STARTTLS
    SelfSigned {
        /// Certificate path
        cert_path: String,
        /// Path to key file
        key_path: String,
    },
    /// Use a certificate from an authority
    Trusted {
        /// Certificate path
        cert_path: String,
        /// Key file path
        key_path: String,
        /// Path to CA bundle
        chain_path: String,
    },
}

cfg_if! {
    if #[cfg(feature = "rtls")] {
        pub(crate) use crate::rtls::{SslImpl, SslStream};
    } else {
        // Built without a TLS library, STARTTLS is never offered
        #[derive(Clone)]
        pub(crate) struct SslImpl;

        pub(crate) type SslStream = TcpStream;

        impl SslImpl {
            pub fn setup(ssl_config: SslConfig) -> Result<Option<Self>, Error> {
                match ssl_config {
                    SslConfig::None => Ok(None),
                    _ => Error::bail("STARTTLS requested but built without TLS support"),
                }
            }

            pub fn accept(&self, stream: TcpStream) -> Result<SslStream, Error> {
                Ok(stream)
            }
        }
    }
}

// Wrap a plaintext connection in TLS after a STARTTLS reply
pub(crate) fn upgrade_tls(stream: TcpStream, ssl: Option<&SslImpl>) -> Result<SslStream, Error> {
    match ssl {
        Some(acceptor) => acceptor.accept(stream),
        None => Error::bail("Cannot upgrade to TLS without an SslAcceptor"),
    }
}
