use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use rustls::ServerConnection;

use super::{TlsContext, TlsError};

/// Handshake progress of one secured connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    Handshake,
    Established,
    Error,
}

/// The outcome of driving the bridge once: plaintext for the application
/// layer and ciphertext owed to the transport.
#[derive(Debug, Default)]
pub struct TlsIo {
    pub plaintext: BytesMut,
    pub ciphertext: Vec<u8>,
    /// The peer sent its close notification; no more plaintext follows.
    pub peer_closed: bool,
}

/// Per-connection TLS state machine, decoupled from the transport by a
/// pair of in-memory membranes.
///
/// Inbound ciphertext is staged in the read membrane and pulled by the
/// engine as it needs input; records the engine wants to emit are drained
/// into the write membrane and handed back to the caller. The engine never
/// sees a file descriptor, so it can never block the owning connection.
pub struct SecureConn {
    session: ServerConnection,
    read_membrane: BytesMut,
    write_membrane: Vec<u8>,
    state: TlsState,
}

impl SecureConn {
    pub fn new(context: &TlsContext) -> Result<Self, TlsError> {
        let session = ServerConnection::new(context.server_config())?;
        Ok(Self {
            session,
            read_membrane: BytesMut::new(),
            write_membrane: Vec::new(),
            state: TlsState::Handshake,
        })
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    /// Drives the engine with newly arrived ciphertext, consuming all of
    /// `inbound`.
    ///
    /// The write membrane is drained into the result unconditionally, in
    /// the handshake because the peer cannot make progress until it sees
    /// our flight, and afterwards because the engine may emit protocol
    /// messages of its own at any time.
    pub fn on_read(&mut self, inbound: &mut BytesMut) -> Result<TlsIo, TlsError> {
        self.read_membrane.extend_from_slice(inbound);
        inbound.clear();

        let mut io = TlsIo::default();
        if let Err(err) = self.pump(&mut io) {
            self.state = TlsState::Error;
            // Still flush whatever the engine queued, typically an alert.
            self.drain(&mut io.ciphertext);
            return Err(err);
        }
        self.drain(&mut io.ciphertext);
        Ok(io)
    }

    /// Encrypts `plaintext` and returns the records to put on the wire.
    /// Only legal once the handshake has completed.
    pub fn send(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
        if self.state != TlsState::Established {
            return Err(TlsError::NotEstablished);
        }
        self.session
            .writer()
            .write_all(plaintext)
            .map_err(TlsError::Syscall)?;
        let mut ciphertext = Vec::new();
        self.drain(&mut ciphertext);
        Ok(ciphertext)
    }

    fn pump(&mut self, io: &mut TlsIo) -> Result<(), TlsError> {
        // Feed the engine from the read membrane until it stops taking
        // bytes; each batch of records is processed before the next read.
        while !self.read_membrane.is_empty() {
            let mut cursor = &self.read_membrane[..];
            let taken = self.session.read_tls(&mut cursor)?;
            if taken == 0 {
                break;
            }
            self.read_membrane.advance(taken);
            self.session.process_new_packets()?;
        }

        if self.state == TlsState::Handshake && !self.session.is_handshaking() {
            self.state = TlsState::Established;
            log::info!(
                "TLS handshake completed, suite {:?}, protocol {:?}",
                self.session.negotiated_cipher_suite(),
                self.session.protocol_version()
            );
        }

        if self.state == TlsState::Established {
            let mut chunk = [0u8; 4096];
            loop {
                match self.session.reader().read(&mut chunk) {
                    // Clean shutdown from the peer.
                    Ok(0) => {
                        io.peer_closed = true;
                        break;
                    }
                    Ok(n) => io.plaintext.extend_from_slice(&chunk[..n]),
                    // No complete record buffered; wait for more network
                    // bytes.
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(TlsError::Syscall(err)),
                }
            }
        }
        Ok(())
    }

    /// Moves every pending record out of the engine into `out`.
    fn drain(&mut self, out: &mut Vec<u8>) {
        while self.session.wants_write() {
            if let Err(err) = self.session.write_tls(&mut self.write_membrane) {
                log::error!("draining TLS records failed: {err}");
                self.state = TlsState::Error;
                break;
            }
        }
        out.append(&mut self.write_membrane);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::{ring, WebPkiSupportedAlgorithms};
    use rustls::{ClientConnection, DigitallySignedStruct, SignatureScheme};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

    use super::*;
    use crate::tls::context::tests::test_context;

    /// Accepts any server certificate. The tests exercise the bridge, not
    /// the web PKI.
    #[derive(Debug)]
    struct AcceptAnyCert(WebPkiSupportedAlgorithms);

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.supported_schemes()
        }
    }

    pub(crate) fn test_client_config() -> Arc<rustls::ClientConfig> {
        let provider = ring::default_provider();
        let algorithms = provider.signature_verification_algorithms;
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(algorithms)))
            .with_no_client_auth();
        Arc::new(config)
    }

    fn test_client() -> ClientConnection {
        ClientConnection::new(test_client_config(), ServerName::try_from("localhost").unwrap())
            .unwrap()
    }

    fn client_flight(client: &mut ClientConnection) -> Vec<u8> {
        let mut wire = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut wire).unwrap();
        }
        wire
    }

    fn feed_client(client: &mut ClientConnection, wire: &[u8]) {
        let mut rest = wire;
        while !rest.is_empty() {
            let taken = client.read_tls(&mut rest).unwrap();
            assert!(taken > 0);
            client.process_new_packets().unwrap();
        }
    }

    fn establish(tag: &str) -> (ClientConnection, SecureConn) {
        let mut server = SecureConn::new(&test_context(tag)).unwrap();
        let mut client = test_client();
        for _ in 0..10 {
            if !client.is_handshaking() && server.state() == TlsState::Established {
                break;
            }
            let flight = client_flight(&mut client);
            let mut inbound = BytesMut::from(&flight[..]);
            let io = server.on_read(&mut inbound).unwrap();
            feed_client(&mut client, &io.ciphertext);
        }
        assert!(!client.is_handshaking());
        assert_eq!(server.state(), TlsState::Established);
        (client, server)
    }

    fn read_client_plaintext(client: &mut ClientConnection) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match client.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => panic!("client read failed: {err}"),
            }
        }
        out
    }

    #[test]
    fn handshake_completes_through_membranes() {
        establish("handshake");
    }

    #[test]
    fn first_flight_is_answered_immediately() {
        let mut server = SecureConn::new(&test_context("first-flight")).unwrap();
        let mut client = test_client();
        let hello = client_flight(&mut client);
        let mut inbound = BytesMut::from(&hello[..]);
        let io = server.on_read(&mut inbound).unwrap();
        // Without this unconditional drain the peer would wait forever.
        assert!(!io.ciphertext.is_empty());
        assert_eq!(server.state(), TlsState::Handshake);
    }

    #[test]
    fn plaintext_survives_chunked_transport() {
        let (mut client, mut server) = establish("fidelity");
        let payload = b"GET / HTTP/1.1\r\nHost: example\r\n\r\n";
        client.writer().write_all(payload).unwrap();
        let wire = client_flight(&mut client);

        let mut received = BytesMut::new();
        for chunk in wire.chunks(7) {
            let mut inbound = BytesMut::from(chunk);
            let io = server.on_read(&mut inbound).unwrap();
            received.extend_from_slice(&io.plaintext);
        }
        assert_eq!(&received[..], payload.as_slice());
    }

    #[test]
    fn multiple_writes_concatenate_in_order() {
        let (mut client, mut server) = establish("ordering");
        client.writer().write_all(b"first ").unwrap();
        client.writer().write_all(b"second").unwrap();
        let wire = client_flight(&mut client);
        let mut inbound = BytesMut::from(&wire[..]);
        let io = server.on_read(&mut inbound).unwrap();
        assert_eq!(&io.plaintext[..], b"first second".as_slice());
    }

    #[test]
    fn send_round_trips_to_the_client() {
        let (mut client, mut server) = establish("send");
        let wire = server.send(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(!wire.is_empty());
        feed_client(&mut client, &wire);
        assert_eq!(read_client_plaintext(&mut client), b"HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn send_before_handshake_is_refused() {
        let mut server = SecureConn::new(&test_context("early-send")).unwrap();
        assert!(matches!(
            server.send(b"nope"),
            Err(TlsError::NotEstablished)
        ));
    }

    #[test]
    fn garbage_ciphertext_enters_error_state() {
        let mut server = SecureConn::new(&test_context("garbage")).unwrap();
        let mut inbound = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
        assert!(server.on_read(&mut inbound).is_err());
        assert_eq!(server.state(), TlsState::Error);
    }

    #[test]
    fn close_notify_reports_peer_closed() {
        let (mut client, mut server) = establish("close");
        client.send_close_notify();
        let wire = client_flight(&mut client);
        let mut inbound = BytesMut::from(&wire[..]);
        let io = server.on_read(&mut inbound).unwrap();
        assert!(io.peer_closed);
    }
}
