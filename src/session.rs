use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::connection::{Connection, Dialer};
use crate::endpoint::Endpoint;
use crate::error::SessionError;
use crate::protocol::{client_endpoint, client_hello, parse_server_hello, Protocol};
use crate::response::{frame_length, Framing};
use crate::serial::CodecError;

/// Address announced instead of the real one when probing for a localhost
/// bypass.
pub const LOOPBACK_ORIGIN: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for the handshake and for each call's reply.
    pub timeout: Duration,
    /// How long to wait for more bytes after a reply that may be complete.
    pub void_grace: Duration,
    /// Host announced in the handshake. `None` echoes what the server reports.
    pub origin: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            void_grace: Duration::from_millis(75),
            origin: None,
        }
    }
}

impl SessionOptions {
    pub fn spoofed(mut self) -> Self {
        self.origin = Some(LOOPBACK_ORIGIN.to_owned());
        self
    }
}

/// What follows the header of a normal return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    /// The method returns a value. A bare header is never the whole reply.
    Value,
    /// The method may be void. A bare header ends the reply once the peer
    /// stays quiet for `void_grace`.
    #[default]
    MaybeVoid,
}

/// One JRMP connection to one endpoint, carrying calls strictly one after
/// another.
///
/// The connection is opened on first use and reopened after any failure. It
/// is closed when the session is dropped.
pub struct Session {
    endpoint: Endpoint,
    dialer: Arc<dyn Dialer>,
    options: SessionOptions,
    conn: Option<Box<dyn Connection>>,
    buf: Vec<u8>,
}

impl Session {
    pub fn new(endpoint: Endpoint, dialer: Arc<dyn Dialer>, options: SessionOptions) -> Self {
        Self {
            endpoint,
            dialer,
            options,
            conn: None,
            buf: Vec::new(),
        }
    }

    /// Creates a session and connects right away.
    pub async fn open(
        endpoint: Endpoint,
        dialer: Arc<dyn Dialer>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self::new(endpoint, dialer, options);
        session.connect().await?;
        Ok(session)
    }

    /// A new, unconnected session to the same endpoint.
    pub fn fork(&self) -> Session {
        self.fork_with(self.options.clone())
    }

    pub fn fork_with(&self, options: SessionOptions) -> Session {
        Session::new(self.endpoint.clone(), Arc::clone(&self.dialer), options)
    }

    /// A new, unconnected session to another endpoint with the same options.
    pub fn to(&self, endpoint: Endpoint) -> Session {
        Session::new(endpoint, Arc::clone(&self.dialer), self.options.clone())
    }

    pub fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.dialer)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_spoofed(&self) -> bool {
        self.options.origin.as_deref() == Some(LOOPBACK_ORIGIN)
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        let mut conn =
            self.dialer
                .dial(&self.endpoint)
                .await
                .map_err(|source| SessionError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                })?;

        conn.send(&client_hello(Protocol::Stream)).await?;
        self.buf.clear();
        let deadline = Instant::now() + self.options.timeout;
        let hello = loop {
            match parse_server_hello(&self.buf) {
                Ok((hello, _)) => break hello,
                Err(CodecError::Incomplete) => {}
                Err(err) => {
                    return Err(SessionError::Handshake {
                        endpoint: self.endpoint.clone(),
                        reason: err.to_string(),
                    })
                }
            }
            let read = tokio::time::timeout_at(deadline, conn.recv(&mut self.buf))
                .await
                .map_err(|_| SessionError::Timeout(self.options.timeout))??;
            if read == 0 {
                return Err(SessionError::Handshake {
                    endpoint: self.endpoint.clone(),
                    reason: "connection closed during handshake".to_owned(),
                });
            }
        };
        self.buf.clear();

        let origin = self.options.origin.as_deref().unwrap_or(&hello.host);
        conn.send(&client_endpoint(origin, 0)).await?;
        debug!(
            endpoint = %self.endpoint,
            seen_as = %hello.host,
            origin,
            "JRMP handshake complete"
        );
        self.conn = Some(conn);
        Ok(())
    }

    /// Sends one call message and returns the raw reply message.
    ///
    /// Any failure drops the connection so the next call starts on a fresh one.
    pub async fn call(&mut self, message: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.call_expecting(message, ReturnKind::MaybeVoid).await
    }

    pub async fn call_expecting(
        &mut self,
        message: &[u8],
        returns: ReturnKind,
    ) -> Result<Vec<u8>, SessionError> {
        let result = self.exchange(message, returns).await;
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    async fn exchange(&mut self, message: &[u8], returns: ReturnKind) -> Result<Vec<u8>, SessionError> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(SessionError::Io(std::io::ErrorKind::NotConnected.into())),
        };

        conn.send(message).await?;
        self.buf.clear();
        let call_timeout = self.options.timeout;
        let deadline = Instant::now() + call_timeout;
        loop {
            match frame_length(&self.buf) {
                Ok(Framing::Complete(len)) => {
                    let reply = self.take_reply(len);
                    return Ok(reply);
                }
                Ok(Framing::MaybeVoid(_)) if returns == ReturnKind::Value => {}
                Ok(Framing::MaybeVoid(len)) => {
                    // a void return is indistinguishable from the start of a
                    // longer one until the peer goes quiet
                    match timeout(self.options.void_grace, conn.recv(&mut self.buf)).await {
                        Err(_) => return Ok(self.take_reply(len)),
                        Ok(read) => {
                            if read? == 0 {
                                let reply = self.take_reply(len);
                                self.conn = None;
                                return Ok(reply);
                            }
                            continue;
                        }
                    }
                }
                Err(CodecError::Incomplete) => {}
                Err(err) => return Err(err.into()),
            }

            let read = tokio::time::timeout_at(deadline, conn.recv(&mut self.buf))
                .await
                .map_err(|_| SessionError::Timeout(call_timeout))??;
            if read == 0 {
                return Err(SessionError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            trace!(endpoint = %self.endpoint, buffered = self.buf.len(), "reading reply");
        }
    }

    fn take_reply(&mut self, len: usize) -> Vec<u8> {
        let reply = self.buf[..len].to_vec();
        if self.buf.len() > len {
            // the stream is out of sync with what was parsed
            debug!(endpoint = %self.endpoint, extra = self.buf.len() - len, "trailing bytes after reply");
            self.conn = None;
        }
        self.buf.clear();
        reply
    }

    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallFrame, Selector};
    use crate::mock::{MockDialer, MockReply};
    use crate::protocol::ObjId;
    use crate::registry::REGISTRY_INTERFACE_HASH;

    fn registry_call() -> Vec<u8> {
        CallFrame::new(
            ObjId::REGISTRY,
            Selector::Legacy {
                op: 1,
                interface_hash: REGISTRY_INTERFACE_HASH,
            },
            Vec::new(),
        )
        .encode()
    }

    #[tokio::test]
    async fn reuses_one_connection_for_sequential_calls() {
        let dialer = MockDialer::new(|_| MockReply::string_array(&["a", "b"]));
        let mut session = Session::new(
            Endpoint::new("target", 1099),
            dialer.clone(),
            SessionOptions::default(),
        );

        for _ in 0..3 {
            let reply = session.call(&registry_call()).await.unwrap();
            assert_eq!(reply[0], 0x51);
        }
        assert_eq!(dialer.dials(), 1);
        assert_eq!(dialer.calls().len(), 3);
        assert_eq!(dialer.calls()[0].obj_id, ObjId::REGISTRY);
    }

    #[tokio::test]
    async fn void_return_completes_after_grace() {
        let dialer = MockDialer::new(|_| MockReply::Void);
        let mut session = Session::new(
            Endpoint::new("target", 1099),
            dialer,
            SessionOptions {
                void_grace: Duration::from_millis(10),
                ..SessionOptions::default()
            },
        );
        let reply = session.call(&registry_call()).await.unwrap();
        assert_eq!(reply.len(), 1 + 4 + 2 + 15);
    }

    #[tokio::test]
    async fn value_arriving_after_the_grace_is_awaited() {
        use crate::mock::OneShotDialer;
        use crate::connection::Remote;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, mut server) = tokio::io::duplex(4096);
        let peer = tokio::spawn(async move {
            let mut hello = [0u8; 7];
            server.read_exact(&mut hello).await.unwrap();
            let mut reply = vec![0x4E];
            crate::util::put_utf(&mut reply, "10.0.0.5");
            reply.extend_from_slice(&4711i32.to_be_bytes());
            server.write_all(&reply).await.unwrap();
            let mut announced = vec![0u8; 2 + 8 + 4];
            server.read_exact(&mut announced).await.unwrap();

            let mut call = [0u8; 128];
            let read = server.read(&mut call).await.unwrap();
            assert!(read > 0);
            // normal return header, then the String value in a later segment
            let mut header = vec![0x51, 0xAC, 0xED, 0x00, 0x05, 0x77, 0x0F, 0x01];
            header.extend_from_slice(&[0u8; 14]);
            server.write_all(&header).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            server.write_all(&[0x74, 0x00, 0x02, b'o', b'k']).await.unwrap();
            server
        });

        let mut session = Session::new(
            Endpoint::new("target", 1099),
            Arc::new(OneShotDialer::new(Box::new(Remote::from_stream(client)))),
            SessionOptions {
                void_grace: Duration::from_millis(10),
                ..SessionOptions::default()
            },
        );
        let reply = session
            .call_expecting(&registry_call(), ReturnKind::Value)
            .await
            .unwrap();
        assert_eq!(reply.len(), 1 + 4 + 2 + 15 + 5);
        assert_eq!(&reply[reply.len() - 2..], b"ok");
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn spoofed_session_announces_loopback() {
        let dialer = MockDialer::new(|_| MockReply::Void);
        let mut session = Session::new(
            Endpoint::new("target", 1099),
            dialer.clone(),
            SessionOptions::default().spoofed(),
        );
        session.call(&registry_call()).await.unwrap();
        assert_eq!(dialer.calls()[0].origin, LOOPBACK_ORIGIN);

        let mut plain = Session::new(
            Endpoint::new("target", 1099),
            dialer.clone(),
            SessionOptions::default(),
        );
        plain.call(&registry_call()).await.unwrap();
        assert_eq!(dialer.calls()[1].origin, crate::mock::CLIENT_ADDRESS);
    }

    #[tokio::test]
    async fn silent_peer_times_out_and_reconnects() {
        let dialer = MockDialer::new(|_| MockReply::Silence);
        let mut session = Session::new(
            Endpoint::new("target", 1099),
            dialer.clone(),
            SessionOptions {
                timeout: Duration::from_millis(20),
                ..SessionOptions::default()
            },
        );
        assert!(matches!(
            session.call(&registry_call()).await,
            Err(SessionError::Timeout(_))
        ));
        assert!(session.call(&registry_call()).await.is_err());
        assert_eq!(dialer.dials(), 2);
    }

    #[tokio::test]
    async fn handshake_over_duplex_stream() {
        use crate::connection::Remote;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, mut server) = tokio::io::duplex(256);
        let peer = tokio::spawn(async move {
            let mut hello = [0u8; 7];
            server.read_exact(&mut hello).await.unwrap();
            assert_eq!(&hello[..4], b"JRMI");
            let mut reply = vec![0x4E];
            crate::util::put_utf(&mut reply, "192.168.1.10");
            reply.extend_from_slice(&4711i32.to_be_bytes());
            server.write_all(&reply).await.unwrap();

            let mut announced = vec![0u8; 2 + 12 + 4];
            server.read_exact(&mut announced).await.unwrap();
            announced
        });

        let dialer = crate::mock::OneShotDialer::new(Box::new(Remote::from_stream(client)));
        let session = Session::open(
            Endpoint::new("target", 1099),
            Arc::new(dialer),
            SessionOptions::default(),
        )
        .await
        .unwrap();
        let announced = peer.await.unwrap();
        assert_eq!(&announced[2..14], b"192.168.1.10");
        assert_eq!(&announced[14..], &[0, 0, 0, 0]);
        drop(session);
    }
}
