//! Client stream abstraction for TLS and plain TCP.

use rustls::{ClientConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A blocking client stream that can be either plain TCP or TLS.
#[derive(Debug)]
pub enum ClientStream {
    Plain { stream: TcpStream },
    Tls {
        stream: Box<StreamOwned<ClientConnection, TcpStream>>,
    },
}

impl ClientStream {
    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }

    /// The underlying TCP socket.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            ClientStream::Plain { stream } => stream,
            ClientStream::Tls { stream } => &stream.sock,
        }
    }

    /// Returns whether the peer performed an orderly close.
    ///
    /// Never blocks and never consumes application data. TLS records that
    /// arrived are decrypted into the session buffer and stay readable.
    pub fn peer_closed(&mut self) -> io::Result<bool> {
        self.tcp().set_nonblocking(true)?;
        let result = match self {
            ClientStream::Plain { stream } => {
                let mut byte = [0u8; 1];
                stream.peek(&mut byte).map(|n| n == 0)
            }
            ClientStream::Tls { stream } => tls_peer_closed(stream),
        };
        let restored = self.tcp().set_nonblocking(false);

        let closed = match result {
            Ok(closed) => closed,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => return Err(e),
        };
        restored?;
        Ok(closed)
    }

    /// Sends `close_notify` on TLS streams and shuts the socket down.
    pub fn shutdown(&mut self) {
        if let ClientStream::Tls { stream } = self {
            stream.conn.send_close_notify();
            let _ = stream.flush();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

fn tls_peer_closed(stream: &mut StreamOwned<ClientConnection, TcpStream>) -> io::Result<bool> {
    let eof = if stream.conn.wants_read() {
        match stream.conn.read_tls(&mut stream.sock) {
            Ok(n) => n == 0,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => return Err(e),
        }
    } else {
        false
    };

    let state = stream
        .conn
        .process_new_packets()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if state.plaintext_bytes_to_read() > 0 {
        return Ok(false);
    }
    Ok(eof || state.peer_has_closed())
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Plain { stream } => stream.read(buf),
            ClientStream::Tls { stream } => stream.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Plain { stream } => stream.write(buf),
            ClientStream::Tls { stream } => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Plain { stream } => stream.flush(),
            ClientStream::Tls { stream } => stream.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
    use rustls::{ClientConfig, RootCertStore, ServerConfig, ServerConnection};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pair() -> (ClientStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (ClientStream::Plain { stream: client }, server)
    }

    #[test]
    fn test_open_stream_is_not_closed() {
        let (mut stream, _server) = pair();
        assert!(!stream.is_tls());
        assert!(!stream.peer_closed().unwrap());
        // Repeated checks observe the same state
        assert!(!stream.peer_closed().unwrap());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (mut stream, mut server) = pair();
        server.write_all(b"{}").unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(!stream.peer_closed().unwrap());
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"{}");
    }

    #[test]
    fn test_peer_close_detected() {
        let (mut stream, server) = pair();
        drop(server);
        thread::sleep(Duration::from_millis(20));
        assert!(stream.peer_closed().unwrap());
        assert!(stream.peer_closed().unwrap());
    }

    fn tls_pair() -> (ClientStream, StreamOwned<ServerConnection, TcpStream>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = CertificateDer::from(certified.cert.der().to_vec());
        let key = PrivateKeyDer::Pkcs8(certified.key_pair.serialize_der().into());

        let server_config = Arc::new(
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(vec![cert.clone()], key)
                .unwrap(),
        );
        let mut roots = RootCertStore::empty();
        roots.add(cert).unwrap();
        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut conn = ServerConnection::new(server_config).unwrap();
            while conn.is_handshaking() {
                conn.complete_io(&mut sock).unwrap();
            }
            StreamOwned::new(conn, sock)
        });

        let tcp = TcpStream::connect(addr).unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        let client = crate::tls::handshake(client_config, name, tcp).unwrap();
        (
            ClientStream::Tls {
                stream: Box::new(client),
            },
            server.join().unwrap(),
        )
    }

    #[test]
    fn test_tls_probe_keeps_pending_data() {
        let (mut stream, mut server) = tls_pair();
        assert!(stream.is_tls());
        assert!(!stream.peer_closed().unwrap());

        server.write_all(b"HTTP/1.1 200 OK").unwrap();
        server.flush().unwrap();
        thread::sleep(Duration::from_millis(50));

        assert!(!stream.peer_closed().unwrap());
        assert!(!stream.peer_closed().unwrap());

        let mut buf = [0u8; 15];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"HTTP/1.1 200 OK");
    }

    #[test]
    fn test_tls_close_notify_detected() {
        let (mut stream, mut server) = tls_pair();
        server.conn.send_close_notify();
        server.flush().unwrap();
        drop(server);
        thread::sleep(Duration::from_millis(50));

        assert!(stream.peer_closed().unwrap());
        assert!(stream.peer_closed().unwrap());
    }

    #[test]
    fn test_tls_socket_close_detected() {
        let (mut stream, server) = tls_pair();
        drop(server);
        thread::sleep(Duration::from_millis(50));

        assert!(stream.peer_closed().unwrap());
        assert!(stream.peer_closed().unwrap());
    }
}
