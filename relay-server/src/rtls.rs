use crate::err::Error;
use crate::ssl::SslConfig;
use rustls::{Certificate, PrivateKey, ServerConfig, ServerConnection, StreamOwned};
use rustls_pemfile::Item;
use std::fs;
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;

// Rustls wrapper
#[derive(Clone)]
pub(crate) struct SslImpl {
    tls_config: Arc<ServerConfig>,
}

pub(crate) type SslStream = StreamOwned<ServerConnection, TcpStream>;

impl From<rustls::Error> for Error {
    fn from(error: rustls::Error) -> Self {
        let msg = format!("{}", error);
        Error::with_source(msg, error)
    }
}

impl SslImpl {
    pub fn setup(ssl_config: SslConfig) -> Result<Option<Self>, Error> {
        let (certs, key) = match ssl_config {
            SslConfig::Trusted {
                cert_path,
                key_path,
                chain_path,
            } => {
                let mut certs = load_certs(&cert_path)?;
                let mut chain = load_certs(&chain_path)?;
                certs.append(&mut chain);
                (certs, load_key(&key_path)?)
            }
            SslConfig::SelfSigned {
                cert_path,
                key_path,
            } => (load_certs(&cert_path)?, load_key(&key_path)?),
            SslConfig::None => return Ok(None),
        };
        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(SslImpl {
            tls_config: Arc::new(config),
        }))
    }

    // The handshake runs on the first read or write of the returned stream
    pub fn accept(&self, stream: TcpStream) -> Result<SslStream, Error> {
        let conn = ServerConnection::new(self.tls_config.clone())?;
        Ok(StreamOwned::new(conn, stream))
    }
}

fn open(filename: &str) -> Result<BufReader<fs::File>, Error> {
    let file = fs::File::open(filename)
        .map_err(|e| Error::with_source(format!("Cannot open {}", filename), e))?;
    Ok(BufReader::new(file))
}

fn load_certs(filename: &str) -> Result<Vec<Certificate>, Error> {
    let mut reader = open(filename)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| Error::with_source("Unparseable certificates", e))?;
    if certs.is_empty() {
        return Error::bail(format!("No certificates found in {}", filename));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(filename: &str) -> Result<PrivateKey, Error> {
    let mut reader = open(filename)?;
    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| Error::with_source("Unparseable private key", e))?
        {
            Some(Item::PKCS8Key(key)) | Some(Item::RSAKey(key)) | Some(Item::ECKey(key)) => {
                return Ok(PrivateKey(key))
            }
            Some(_) => (),
            None => return Error::bail(format!("No RSA or PKCS8 keys found in {}", filename)),
        }
    }
}
