use crate::auth::AuthPolicy;
use crate::forward::RoutingOverrides;
use crate::ses::CredentialSource;
use anyhow::{anyhow, bail, Context, Result};
use getopts::{Matches, Options};
use relay_server::{SslConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RECIPIENTS};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 10025;
const DOMAIN: &str = "localhost";
const DEFAULT_TIMEOUT_SECS: u64 = 100;
const DEFAULT_SES_TIMEOUT_SECS: u64 = 30;
const DEFAULT_THREADS: usize = 16;

// Command line option names
const OPT_HELP: &str = "help";
const OPT_HOST: &str = "host";
const OPT_PORT: &str = "port";
const OPT_SERVER: &str = "server";
const OPT_NO_AUTH: &str = "no-auth";
const OPT_PLAIN_AUTH: &str = "plain-auth";
const OPT_ANON_AUTH: &str = "anon-auth";
const OPT_USER: &str = "user";
const OPT_PASSWORD: &str = "password";
const OPT_REGION: &str = "region";
const OPT_SOURCE_ARN: &str = "source-arn";
const OPT_FROM_ARN: &str = "from-arn";
const OPT_RETURN_PATH_ARN: &str = "return-path-arn";
const OPT_ACCESS_KEY: &str = "access-key";
const OPT_SECRET_KEY: &str = "secret-key";
const OPT_READ_TIMEOUT: &str = "read-timeout";
const OPT_WRITE_TIMEOUT: &str = "write-timeout";
const OPT_SES_TIMEOUT: &str = "ses-timeout";
const OPT_MAX_MESSAGE_SIZE: &str = "max-message-size";
const OPT_MAX_RECIPIENTS: &str = "max-recipients";
const OPT_THREADS: &str = "threads";
const OPT_SSL_CERT: &str = "ssl-cert";
const OPT_SSL_KEY: &str = "ssl-key";
const OPT_SSL_CHAIN: &str = "ssl-chain";
const OPT_LOG: &str = "log";
const OPT_STATSD: &str = "statsd";
const OPT_VERBOSE: &str = "verbose";

/// Certificate files for STARTTLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_path: String,
    pub key_path: String,
    pub chain_path: Option<String>,
}

/// Settings for the whole process, validated once at startup
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub auth_policy: AuthPolicy,
    pub insecure_auth: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub region: String,
    pub routing: RoutingOverrides,
    pub credentials: CredentialSource,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ses_timeout: Duration,
    pub max_message_size: usize,
    pub max_recipients: usize,
    pub threads: usize,
    pub tls: Option<TlsFiles>,
    pub log_dir: Option<String>,
    pub statsd: Option<String>,
    pub verbose: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("server_name", &self.server_name)
            .field("auth_policy", &self.auth_policy)
            .field("insecure_auth", &self.insecure_auth)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "**"))
            .field("region", &self.region)
            .field("routing", &self.routing)
            .field("credentials", &self.credentials)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("ses_timeout", &self.ses_timeout)
            .field("max_message_size", &self.max_message_size)
            .field("max_recipients", &self.max_recipients)
            .field("threads", &self.threads)
            .field("tls", &self.tls)
            .field("log_dir", &self.log_dir)
            .field("statsd", &self.statsd)
            .field("verbose", &self.verbose)
            .finish()
    }
}

pub enum Command {
    Help(String),
    Run(Box<Config>),
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optflag("h", OPT_HELP, "print this help menu");
    opts.optopt("", OPT_HOST, "the host to listen on", "HOST");
    opts.optopt("", OPT_PORT, "the port to listen on (default 10025)", "PORT");
    opts.optopt("s", OPT_SERVER, "the name of the mailserver", "SERVER");
    opts.optflag("", OPT_NO_AUTH, "disable SMTP authentication");
    opts.optflag("", OPT_PLAIN_AUTH, "allow SMTP AUTH without TLS");
    opts.optflag("", OPT_ANON_AUTH, "allow mail from clients that do not AUTH");
    opts.optopt("", OPT_USER, "SMTP username", "USER");
    opts.optopt("", OPT_PASSWORD, "SMTP password", "PASSWORD");
    opts.optopt("", OPT_REGION, "AWS region (e.g. eu-west-1)", "REGION");
    opts.optopt("", OPT_SOURCE_ARN, "AWS Source ARN", "ARN");
    opts.optopt("", OPT_FROM_ARN, "AWS From ARN", "ARN");
    opts.optopt("", OPT_RETURN_PATH_ARN, "AWS Return Path ARN", "ARN");
    opts.optopt("", OPT_ACCESS_KEY, "AWS Access Key", "KEY");
    opts.optopt("", OPT_SECRET_KEY, "AWS Secret Key", "KEY");
    opts.optopt("", OPT_READ_TIMEOUT, "read timeout in seconds", "SECS");
    opts.optopt("", OPT_WRITE_TIMEOUT, "write timeout in seconds", "SECS");
    opts.optopt("", OPT_SES_TIMEOUT, "time allowed for each SES call in seconds", "SECS");
    opts.optopt("", OPT_MAX_MESSAGE_SIZE, "largest message in bytes", "BYTES");
    opts.optopt("", OPT_MAX_RECIPIENTS, "most recipients per message", "COUNT");
    opts.optopt("", OPT_THREADS, "most concurrent connections", "COUNT");
    opts.optopt("", OPT_SSL_CERT, "ssl certificate", "PEM_FILE");
    opts.optopt("", OPT_SSL_KEY, "ssl certificate key", "PEM_FILE");
    opts.optopt(
        "",
        OPT_SSL_CHAIN,
        "ssl chain of trust for the certificate",
        "PEM_FILE",
    );
    opts.optopt("l", OPT_LOG, "the directory to write logs to", "LOG_DIR");
    opts.optopt("", OPT_STATSD, "statsd server for counters", "HOST:PORT");
    opts.optflag("v", OPT_VERBOSE, "debug logging");
    opts
}

/// Parse the command line, `args[0]` is the program name
pub fn parse_args(args: &[String]) -> Result<Command> {
    let program = args.first().map(String::as_str).unwrap_or("ses-relay");
    let opts = options();
    let matches = opts
        .parse(args.iter().skip(1))
        .map_err(|err| anyhow!("Error parsing command line: {}", err))?;
    if matches.opt_present(OPT_HELP) {
        let brief = format!("Usage: {} --region REGION [options]", program);
        return Ok(Command::Help(opts.usage(&brief)));
    }
    if let Some(arg) = matches.free.first() {
        bail!("Unexpected argument: {}", arg);
    }
    Config::from_matches(&matches).map(|c| Command::Run(Box::new(c)))
}

// Options given as empty strings are treated as absent
fn opt_nonempty(matches: &Matches, name: &str) -> Option<String> {
    matches.opt_str(name).filter(|s| !s.is_empty())
}

fn opt_number<T>(matches: &Matches, name: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = matches
        .opt_get_default(name, default)
        .with_context(|| format!("Invalid value for --{}", name))?;
    if value <= T::default() {
        bail!("--{} must be greater than zero", name);
    }
    Ok(value)
}

impl Config {
    fn from_matches(matches: &Matches) -> Result<Self> {
        let region = opt_nonempty(matches, OPT_REGION)
            .ok_or_else(|| anyhow!("--{} is required", OPT_REGION))?;

        let no_auth = matches.opt_present(OPT_NO_AUTH);
        let anon_auth = matches.opt_present(OPT_ANON_AUTH);
        let auth_policy = match (no_auth, anon_auth) {
            (true, true) => bail!("--{} and --{} cannot be combined", OPT_NO_AUTH, OPT_ANON_AUTH),
            (true, false) => AuthPolicy::Disabled,
            (false, true) => AuthPolicy::AnonymousAllowed,
            (false, false) => AuthPolicy::CredentialRequired,
        };
        let username = opt_nonempty(matches, OPT_USER);
        let password = opt_nonempty(matches, OPT_PASSWORD);
        if auth_policy == AuthPolicy::CredentialRequired
            && (username.is_none() || password.is_none())
        {
            bail!(
                "--{} and --{} are required unless --{} or --{} is given",
                OPT_USER,
                OPT_PASSWORD,
                OPT_NO_AUTH,
                OPT_ANON_AUTH
            );
        }

        let credentials = match (
            opt_nonempty(matches, OPT_ACCESS_KEY),
            opt_nonempty(matches, OPT_SECRET_KEY),
        ) {
            (Some(access_key), Some(secret_key)) => CredentialSource::Static {
                access_key,
                secret_key,
            },
            (None, None) => CredentialSource::Ambient,
            _ => bail!(
                "--{} and --{} must be given together",
                OPT_ACCESS_KEY,
                OPT_SECRET_KEY
            ),
        };

        let chain_path = opt_nonempty(matches, OPT_SSL_CHAIN);
        let tls = match (
            opt_nonempty(matches, OPT_SSL_CERT),
            opt_nonempty(matches, OPT_SSL_KEY),
        ) {
            (Some(cert_path), Some(key_path)) => Some(TlsFiles {
                cert_path,
                key_path,
                chain_path,
            }),
            (None, None) => {
                if chain_path.is_some() {
                    bail!("--{} needs --{} and --{}", OPT_SSL_CHAIN, OPT_SSL_CERT, OPT_SSL_KEY);
                }
                None
            }
            _ => bail!(
                "--{} and --{} must be given together",
                OPT_SSL_CERT,
                OPT_SSL_KEY
            ),
        };

        Ok(Self {
            host: opt_nonempty(matches, OPT_HOST).unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: opt_number(matches, OPT_PORT, DEFAULT_PORT)?,
            server_name: opt_nonempty(matches, OPT_SERVER).unwrap_or_else(|| DOMAIN.to_owned()),
            auth_policy,
            insecure_auth: matches.opt_present(OPT_PLAIN_AUTH),
            username,
            password,
            region,
            routing: RoutingOverrides {
                source_arn: opt_nonempty(matches, OPT_SOURCE_ARN),
                from_arn: opt_nonempty(matches, OPT_FROM_ARN),
                return_path_arn: opt_nonempty(matches, OPT_RETURN_PATH_ARN),
            },
            credentials,
            read_timeout: Duration::from_secs(opt_number(
                matches,
                OPT_READ_TIMEOUT,
                DEFAULT_TIMEOUT_SECS,
            )?),
            write_timeout: Duration::from_secs(opt_number(
                matches,
                OPT_WRITE_TIMEOUT,
                DEFAULT_TIMEOUT_SECS,
            )?),
            ses_timeout: Duration::from_secs(opt_number(
                matches,
                OPT_SES_TIMEOUT,
                DEFAULT_SES_TIMEOUT_SECS,
            )?),
            max_message_size: opt_number(matches, OPT_MAX_MESSAGE_SIZE, DEFAULT_MAX_MESSAGE_SIZE)?,
            max_recipients: opt_number(matches, OPT_MAX_RECIPIENTS, DEFAULT_MAX_RECIPIENTS)?,
            threads: opt_number(matches, OPT_THREADS, DEFAULT_THREADS)?,
            tls,
            log_dir: opt_nonempty(matches, OPT_LOG),
            statsd: opt_nonempty(matches, OPT_STATSD),
            verbose: matches.opt_present(OPT_VERBOSE),
        })
    }

    /// The address given to the listener
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn ssl_config(&self) -> SslConfig {
        match &self.tls {
            None => SslConfig::None,
            Some(TlsFiles {
                cert_path,
                key_path,
                chain_path: None,
            }) => SslConfig::SelfSigned {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            },
            Some(TlsFiles {
                cert_path,
                key_path,
                chain_path: Some(chain_path),
            }) => SslConfig::Trusted {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
                chain_path: chain_path.clone(),
            },
        }
    }
}
