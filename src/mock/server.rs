//! JSON-lines TCP front end for [`MockSchedd`].
//!
//! Each connection is one session. A connection that closes without
//! committing loses its open transaction.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;

use super::schedd::MockSchedd;

/// Accept connections forever, one thread per connection.
pub fn serve(listener: TcpListener, schedd: MockSchedd) -> io::Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let schedd = schedd.clone();
        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            if let Err(e) = pump(stream, &schedd) {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
    Ok(())
}

fn pump(stream: TcpStream, schedd: &MockSchedd) -> io::Result<()> {
    let session = schedd.open_session();
    tracing::debug!(?session, "session opened");
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    let result: io::Result<()> = (|| {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = schedd.handle_json(session, &line) {
                writer.write_all(reply.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
        }
        Ok(())
    })();

    schedd.close_session(session);
    tracing::debug!(?session, "session closed");
    result
}

/// Bind `addr` and serve in a background thread. Returns the bound address.
pub fn spawn(schedd: MockSchedd, addr: impl ToSocketAddrs) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr)?;
    let local = listener.local_addr()?;
    thread::spawn(move || serve(listener, schedd));
    Ok(local)
}
