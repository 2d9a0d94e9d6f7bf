// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data Receiver Manager: accepts TCP connections from data senders and
//! decodes the fragments they write into a shared channel.

use crate::error::TransportError;
use crossbeam::channel::{self, Receiver, Sender};
use daq_proto::{Fragment, FragmentHeader, HEADER_BYTES};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Listens for incoming DSM connections and funnels decoded fragments from
/// every connection into one channel.
pub struct FragmentReceiver {
    local_addr: SocketAddr,
    rx: Receiver<Fragment>,
    stop: Arc<AtomicBool>,
}

impl FragmentReceiver {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let (tx, rx) = channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = Arc::clone(&stop);
        std::thread::spawn(move || accept_loop(listener, tx, accept_stop));
        Ok(Self { local_addr, rx, stop })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn recv_fragment(&self, timeout: Duration) -> Result<Fragment, TransportError> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| TransportError::Timeout(timeout))
    }

    pub fn try_recv_fragment(&self) -> Option<Fragment> {
        self.rx.try_recv().ok()
    }
}

impl Drop for FragmentReceiver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<Fragment>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("DRM accepted connection from {addr}");
                let tx = tx.clone();
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || read_loop(stream, tx, stop));
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                log::warn!("DRM accept error, stopping listener: {e}");
                break;
            }
        }
    }
}

fn read_loop(mut stream: TcpStream, tx: Sender<Fragment>, stop: Arc<AtomicBool>) {
    stream.set_nodelay(true).ok();
    while !stop.load(Ordering::Acquire) {
        match read_one_fragment(&mut stream) {
            Ok(Some(fragment)) => {
                if tx.send(fragment).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::debug!("DRM connection closed: {err}");
                break;
            }
        }
    }
}

fn read_one_fragment(stream: &mut TcpStream) -> io::Result<Option<Fragment>> {
    let mut header_buf = [0u8; HEADER_BYTES];
    if let Err(e) = stream.read_exact(&mut header_buf) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e);
    }
    let header = FragmentHeader::from_bytes(&header_buf).map_err(proto_to_io)?;
    let mut metadata = vec![0u8; header.metadata_word_count as usize * 8];
    stream.read_exact(&mut metadata)?;
    let mut payload = vec![0u8; header.payload_words() as usize * 8];
    stream.read_exact(&mut payload)?;
    Ok(Some(Fragment { header, metadata, payload }))
}

fn proto_to_io(err: daq_proto::ProtoError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::FragmentType;
    use std::io::Write;
    use std::net::TcpStream as ClientStream;

    #[test]
    fn receives_fragment_written_by_a_client() {
        let receiver = FragmentReceiver::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = receiver.local_addr();
        let mut client = ClientStream::connect(addr).unwrap();
        let fragment = Fragment::new(1, 0, 5, FragmentType::Data, vec![], vec![1, 2, 3, 4]);
        client.write_all(&fragment.header.to_bytes()).unwrap();
        client.write_all(&fragment.metadata).unwrap();
        client.write_all(&fragment.payload).unwrap();
        client.flush().unwrap();

        let received = receiver.recv_fragment(Duration::from_secs(2)).unwrap();
        assert_eq!(received.header.sequence_id, 1);
        assert_eq!(&received.payload[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn recv_times_out_with_no_data() {
        let receiver = FragmentReceiver::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(matches!(
            receiver.recv_fragment(Duration::from_millis(50)),
            Err(TransportError::Timeout(_))
        ));
    }
}
