use crate::err::Error;
use crate::ssl::{upgrade_tls, SslImpl};
use crate::Server;
use bufstream::BufStream;
use log::{debug, error, info, warn};
use relay_session::{Action, Handler, Response, Session, SessionBuilder};
use scoped_threadpool::Pool;
use std::io::{BufRead, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Allowance for line endings and dot stuffing on top of the message size
const LINE_MARGIN: usize = 1024;

enum SessionResult {
    Finished,
    UpgradeTls,
}

// Everything a connection thread reads, shared by reference
struct Shared {
    session_builder: SessionBuilder,
    ssl: Option<SslImpl>,
    read_timeout: Duration,
    write_timeout: Duration,
    max_line: u64,
}

/// A server that is accepting connections in a background thread
pub struct RunningServer {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

impl RunningServer {
    pub(crate) fn serve<H>(config: Server<H>) -> Result<Self, Error>
    where
        H: Handler + Clone + Send + 'static,
    {
        let mut session_builder = SessionBuilder::new(config.name.clone());
        let ssl = SslImpl::setup(config.ssl_config)?;
        if ssl.is_some() {
            session_builder.enable_start_tls();
        }
        for auth in &config.auth {
            session_builder.enable_auth(*auth);
        }
        if config.insecure_auth {
            session_builder.allow_insecure_auth();
        }
        session_builder
            .max_message_size(config.max_message_size)
            .max_recipients(config.max_recipients);
        let listener = match config.tcp_listener {
            Some(listener) => listener,
            None => TcpListener::bind(&config.socket_address[..])
                .map_err(|err| Error::with_source("Cannot open listen address", err))?,
        };
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Shared {
            session_builder,
            ssl,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_line: (config.max_message_size + LINE_MARGIN) as u64,
        };
        let num_threads = config.num_threads.max(1) as u32;
        let handler = config.handler;
        let name = config.name;
        let stop_flag = stop.clone();
        let join = thread::Builder::new()
            .name("smtp-accept".to_owned())
            .spawn(move || run(&name, listener, shared, num_threads, handler, &stop_flag))
            .map_err(|err| Error::with_source("Cannot start server thread", err))?;
        Ok(Self {
            local_addr,
            stop,
            join,
        })
    }

    /// The address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for open sessions to finish
    pub fn stop(self) -> Result<(), Error> {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the accept loop so that it sees the flag
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        if let Err(err) = TcpStream::connect(wake) {
            debug!("Cannot wake server on {}: {}", wake, err);
        }
        self.join()
    }

    /// Block until the server stops
    pub fn join(self) -> Result<(), Error> {
        self.join
            .join()
            .map_err(|_| Error::new("Error joining server"))
    }
}

fn run<H>(
    name: &str,
    listener: TcpListener,
    shared: Shared,
    num_threads: u32,
    handler: H,
    stop: &AtomicBool,
) where
    H: Handler + Clone + Send,
{
    let mut pool = Pool::new(num_threads);
    match listener.local_addr() {
        Ok(addr) => info!("{} SMTP started on {}", name, addr),
        Err(_) => info!("{} SMTP started", name),
    }
    let shared = &shared;
    let active = &AtomicUsize::new(0);
    pool.scoped(|scope| {
        for conn in listener.incoming() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match conn {
                // Every worker is busy, answer now rather than queue
                Ok(stream) if active.load(Ordering::SeqCst) >= num_threads as usize => {
                    refuse_connection(stream, shared)
                }
                Ok(stream) => {
                    active.fetch_add(1, Ordering::SeqCst);
                    let handler = handler.clone();
                    scope.execute(move || {
                        handle_connection(stream, shared, handler);
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(err) => error!("Cannot accept connection: {}", err),
            }
        }
    });
    info!("{} SMTP stopped", name);
}

fn refuse_connection(mut stream: TcpStream, shared: &Shared) {
    let remote = stream.peer_addr().map(|saddr| saddr.ip()).ok();
    warn!("Too many connections, refusing {:?}", remote);
    stream.set_write_timeout(Some(shared.write_timeout)).ok();
    let res = Response::custom(421, "Too many connections, try again later");
    if let Err(err) = write_response(&mut stream, &res) {
        debug!("Cannot refuse connection: {}", err);
    }
}

fn handle_connection<H: Handler>(stream: TcpStream, shared: &Shared, handler: H) {
    let remote = stream
        .peer_addr()
        .map(|saddr| saddr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    debug!("New connection from {}", remote);
    stream.set_read_timeout(Some(shared.read_timeout)).ok();
    stream.set_write_timeout(Some(shared.write_timeout)).ok();
    let session = shared.session_builder.build(remote, handler);
    if let Err(err) = start_session(session, stream, shared) {
        error!("({}) {}", remote, err);
    }
    debug!("({}) connection closed", remote);
}

fn start_session<H: Handler>(
    mut session: Session<H>,
    stream: TcpStream,
    shared: &Shared,
) -> Result<(), Error> {
    // Kept for STARTTLS, the buffered stream and anything it holds is dropped
    let tcp = stream.try_clone()?;
    let mut plain = BufStream::new(stream);
    write_response(&mut plain, &session.greeting())?;
    match handle_session(&mut session, &mut plain, shared.max_line)? {
        SessionResult::Finished => Ok(()),
        SessionResult::UpgradeTls => {
            drop(plain);
            let tls = upgrade_tls(tcp, shared.ssl.as_ref())?;
            session.tls_active();
            let mut secure = BufStream::new(tls);
            handle_session(&mut session, &mut secure, shared.max_line)?;
            Ok(())
        }
    }
}

fn handle_session<H, S>(
    session: &mut Session<H>,
    stream: &mut BufStream<S>,
    max_line: u64,
) -> Result<SessionResult, Error>
where
    H: Handler,
    S: Read + Write,
{
    let mut line = Vec::with_capacity(100);
    loop {
        line.clear();
        let num_bytes = Read::take(&mut *stream, max_line).read_until(b'\n', &mut line)?;
        if num_bytes == 0 {
            return Ok(SessionResult::Finished);
        }
        if num_bytes as u64 == max_line && !line.ends_with(b"\n") {
            write_response(stream, &Response::custom(500, "Line too long"))?;
            return Err(Error::new("Line too long, closing connection"));
        }
        let res = session.process(&line);
        match res.action {
            Action::Reply => {
                write_response(stream, &res)?;
            }
            Action::Close => {
                write_response(stream, &res)?;
                return Ok(SessionResult::Finished);
            }
            Action::UpgradeTls => {
                write_response(stream, &res)?;
                return Ok(SessionResult::UpgradeTls);
            }
            Action::NoReply => (),
        }
    }
}

fn write_response(writer: &mut dyn Write, res: &Response) -> Result<(), Error> {
    res.write_to(writer)?;
    writer
        .flush()
        .map_err(|e| Error::with_source("Cannot write response", e))
}

//----- Tests ------------------------------------------------------------------
