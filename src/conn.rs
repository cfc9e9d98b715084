use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};

/// A byte stream a POP3 conversation can run over.
///
/// POP3 is plain line-oriented text, so any `Read + Write` qualifies: a `TcpStream` on port
/// 110, a `native_tls::TlsStream` on port 995, or a scripted stream in tests. Sealed, so the
/// blanket impl below is the only one.
pub trait Pop3Connection: Read + Write + Send + private::Sealed {}

impl<T> Pop3Connection for T where T: Read + Write + Send {}

impl Debug for dyn Pop3Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "POP3 connection")
    }
}

/// What [`ClientBuilder::connect`](crate::ClientBuilder::connect) hands out, so a plain and a
/// TLS session are the same `Session<Connection>` type.
pub type Connection = Box<dyn Pop3Connection>;

mod private {
    use super::{Read, Write};

    pub trait Sealed {}

    impl<T> Sealed for T where T: Read + Write {}
}
