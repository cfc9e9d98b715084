use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::Client;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(feature = "native-tls")]
use native_tls::TlsConnector;

/// The connection mode we are going to use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionMode {
    /// Implicit TLS: the TLS handshake happens before the greeting, usually on port 995.
    Tls,
    /// A plaintext connection, usually on port 110.
    Plain,
}

/// A convenience builder for [`Client`] structs over plain or encrypted transports.
///
/// Creating a [`Client`] using `native-tls` transport is straightforward:
/// ```no_run
/// # use export_mail::ClientBuilder;
/// # fn main() -> Result<(), export_mail::Error> {
/// let client = ClientBuilder::new("pop.example.com", 995).connect()?;
/// # Ok(())
/// # }
/// ```
///
/// Plaintext servers need the mode spelled out:
/// ```no_run
/// # use export_mail::{ClientBuilder, ConnectionMode};
/// # fn main() -> Result<(), export_mail::Error> {
/// let client = ClientBuilder::new("pop.example.com", 110)
///     .mode(ConnectionMode::Plain)
///     .connect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ClientBuilder<D>
where
    D: AsRef<str>,
{
    domain: D,
    port: u16,
    mode: ConnectionMode,
    skip_tls_verify: bool,
    timeout: Option<Duration>,
}

impl<D> ClientBuilder<D>
where
    D: AsRef<str>,
{
    /// Make a new `ClientBuilder` using the given domain and port, defaulting to TLS.
    pub fn new(domain: D, port: u16) -> Self {
        ClientBuilder {
            domain,
            port,
            mode: ConnectionMode::Tls,
            skip_tls_verify: false,
            timeout: None,
        }
    }

    /// Sets the Connection mode to use for this connection
    pub fn mode(&mut self, mode: ConnectionMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Controls the use of certificate validation.
    ///
    /// Defaults to `false`.
    ///
    /// # Warning
    ///
    /// You should only use this as a last resort as it allows another server to impersonate the
    /// server you think you're talking to, which would include being able to receive your
    /// credentials.
    pub fn danger_skip_tls_verify(&mut self, skip_tls_verify: bool) -> &mut Self {
        self.skip_tls_verify = skip_tls_verify;
        self
    }

    /// Bound how long connecting, and every later read or write, may block.
    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Make a [`Client`] using the configuration, then read the server greeting.
    pub fn connect(&mut self) -> Result<Client<Connection>> {
        match self.mode {
            ConnectionMode::Plain => self.connect_with(|_, tcp| Ok(Box::new(tcp) as Connection)),
            ConnectionMode::Tls => self.connect_tls(),
        }
    }

    #[cfg(feature = "native-tls")]
    fn connect_tls(&mut self) -> Result<Client<Connection>> {
        let skip_tls_verify = self.skip_tls_verify;
        self.connect_with(|domain, tcp| {
            let ssl_conn = TlsConnector::builder()
                .danger_accept_invalid_certs(skip_tls_verify)
                .danger_accept_invalid_hostnames(skip_tls_verify)
                .build()?;
            Ok(Box::new(TlsConnector::connect(&ssl_conn, domain, tcp)?) as Connection)
        })
    }

    #[cfg(not(feature = "native-tls"))]
    fn connect_tls(&mut self) -> Result<Client<Connection>> {
        Err(Error::Config(
            "TLS requested but export-mail was built without the native-tls feature".into(),
        ))
    }

    /// Make a [`Client`] using a custom initialization. This function is intended to be used
    /// if your TLS setup requires custom work such as adding private CAs or other specific TLS
    /// parameters.
    ///
    /// The `handshake` argument should accept two parameters:
    ///
    /// - domain: [`&str`]
    /// - tcp: [`TcpStream`]
    ///
    /// and yield a `Result<C>` where `C` is `Read + Write`. The greeting is read from the
    /// returned stream, so TLS must be fully set up by then.
    pub fn connect_with<F, C>(&mut self, handshake: F) -> Result<Client<C>>
    where
        F: FnOnce(&str, TcpStream) -> Result<C>,
        C: Read + Write,
    {
        let tcp = self.tcp()?;
        let stream = handshake(self.domain.as_ref(), tcp)?;
        let mut client = Client::new(stream);
        client.read_greeting()?;
        Ok(client)
    }

    fn tcp(&self) -> Result<TcpStream> {
        let addr = (self.domain.as_ref(), self.port);
        let tcp = match self.timeout {
            None => TcpStream::connect(addr)?,
            Some(timeout) => {
                // resolve address and try to connect to all in order
                let mut last_err = None;
                let mut connected = None;
                for addr in addr.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(tcp) => {
                            connected = Some(tcp);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match connected {
                    Some(tcp) => tcp,
                    None => {
                        return Err(Error::Io(last_err.unwrap_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::NotFound,
                                "host resolved to no addresses",
                            )
                        })))
                    }
                }
            }
        };
        tcp.set_read_timeout(self.timeout)?;
        tcp.set_write_timeout(self.timeout)?;
        Ok(tcp)
    }
}
