//! Supervisory-side Modbus TCP server over the shared register table.
//!
//! Constraints:
//! - handlers only touch the `RegisterTable`, never interpreter memory
//! - FC3 / FC6 / FC16 only; anything else is `IllegalFunction`
//! - out-of-table access is `IllegalDataAddress`, the table stays unchanged
//! - stopping the server also closes every open session

use std::collections::HashMap;
use std::future;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{self, Poll};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use super::shutdown::wait_stop;
use crate::plc::core::register_map::{Signal, TABLE_SIZE};

/// Holding-register image shared between the scan task and server connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterTable {
    words: Vec<u16>,
}

pub type SharedRegisterTable = Arc<Mutex<RegisterTable>>;

impl Default for RegisterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterTable {
    /// Zeroed table with the command block preset (22.0 °C, 45.0 %, deadbands 1.0 / 5.0).
    pub fn new() -> Self {
        let mut table = Self {
            words: vec![0; usize::from(TABLE_SIZE)],
        };
        for (signal, word) in [
            (Signal::SystemEnable, 0),
            (Signal::SetpointTemp, 220),
            (Signal::SetpointHumidity, 450),
            (Signal::TempDeadband, 10),
            (Signal::HumidityDeadband, 50),
        ] {
            table.set(signal, word);
        }
        table
    }

    pub fn shared() -> SharedRegisterTable {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, signal: Signal) -> u16 {
        self.words[usize::from(signal.address())]
    }

    pub fn set(&mut self, signal: Signal, word: u16) {
        self.words[usize::from(signal.address())] = word;
    }

    pub fn read(&self, address: u16, count: u16) -> Option<&[u16]> {
        let start = usize::from(address);
        self.words.get(start..start.checked_add(usize::from(count))?)
    }

    /// All-or-nothing write.
    pub fn write(&mut self, address: u16, words: &[u16]) -> Option<()> {
        let start = usize::from(address);
        let slots = self.words.get_mut(start..start.checked_add(words.len())?)?;
        slots.copy_from_slice(words);
        Some(())
    }
}

pub struct RegisterService {
    table: SharedRegisterTable,
}

impl RegisterService {
    pub fn new(table: SharedRegisterTable) -> Self {
        Self { table }
    }

    fn handle(&self, req: Request<'static>) -> Result<Response, ExceptionCode> {
        match req {
            Request::ReadHoldingRegisters(address, count) => {
                let table = self.table.lock();
                let words = table
                    .read(address, count)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                Ok(Response::ReadHoldingRegisters(words.to_vec()))
            }
            Request::WriteSingleRegister(address, word) => {
                self.table
                    .lock()
                    .write(address, &[word])
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                debug!("[plc][server] write address={address} word={word}");
                Ok(Response::WriteSingleRegister(address, word))
            }
            Request::WriteMultipleRegisters(address, words) => {
                self.table
                    .lock()
                    .write(address, &words)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                debug!("[plc][server] write address={address} words={words:?}");
                let count = u16::try_from(words.len()).map_err(|_| ExceptionCode::IllegalDataValue)?;
                Ok(Response::WriteMultipleRegisters(address, count))
            }
            other => {
                debug!("[plc][server] unsupported request: {other:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}

/// Open supervisory sessions, keyed by id. Each entry holds a second handle to the socket so
/// the server can shut it down while tokio-modbus owns the stream.
#[derive(Default)]
struct Sessions {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, std::net::TcpStream>>,
}

impl Sessions {
    fn track(self: &Arc<Self>, stream: TcpStream) -> io::Result<SessionStream> {
        let stream = stream.into_std()?;
        let handle = stream.try_clone()?;
        let inner = TcpStream::from_std(stream)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open.lock().insert(id, handle);
        Ok(SessionStream {
            inner,
            id,
            sessions: Arc::clone(self),
        })
    }

    /// Shuts down every open socket; the session tasks then see end-of-stream and exit.
    fn close_all(&self) -> usize {
        let open: Vec<std::net::TcpStream> = self.open.lock().drain().map(|(_, s)| s).collect();
        for stream in &open {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                debug!("[plc][server] session shutdown: {err}");
            }
        }
        open.len()
    }

    fn len(&self) -> usize {
        self.open.lock().len()
    }
}

/// Transport handed to tokio-modbus; leaves the session registry when dropped.
struct SessionStream {
    inner: TcpStream,
    id: u64,
    sessions: Arc<Sessions>,
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.sessions.open.lock().remove(&self.id);
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// A session that cannot be tracked is refused; the listener keeps running.
fn accept_session(
    sessions: &Arc<Sessions>,
    table: &SharedRegisterTable,
    stream: TcpStream,
    socket_addr: SocketAddr,
) -> io::Result<Option<(RegisterService, SessionStream)>> {
    let Some((service, stream)) = accept_tcp_connection(stream, socket_addr, |_| {
        Ok(Some(RegisterService::new(Arc::clone(table))))
    })?
    else {
        return Ok(None);
    };

    match sessions.track(stream) {
        Ok(stream) => {
            debug!(
                "[plc][server] accepted peer={socket_addr} sessions={}",
                sessions.len()
            );
            Ok(Some((service, stream)))
        }
        Err(err) => {
            warn!("[plc][server] refused peer={socket_addr}: {err}");
            Ok(None)
        }
    }
}

/// Bound listener; `run` serves until the stop signal flips.
pub struct RegisterServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    table: SharedRegisterTable,
    sessions: Arc<Sessions>,
}

impl RegisterServer {
    pub async fn bind(addr: &str, table: SharedRegisterTable) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("[plc][server] listening addr={local_addr}");
        Ok(Self {
            listener,
            local_addr,
            table,
            sessions: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self, mut stop_rx: watch::Receiver<bool>) -> io::Result<()> {
        let table = self.table;
        let sessions = self.sessions;
        let server = Server::new(self.listener);

        let on_connected = |stream: TcpStream, socket_addr: SocketAddr| {
            future::ready(accept_session(&sessions, &table, stream, socket_addr))
        };
        let on_process_error = |err: io::Error| {
            warn!("[plc][server] connection error: {err}");
        };

        let served = tokio::select! {
            res = server.serve(&on_connected, on_process_error) => Some(res),
            _ = wait_stop(&mut stop_rx) => None,
        };

        let closed = sessions.close_all();
        match served {
            Some(res) => res,
            None => {
                info!(
                    "[plc][server] stopped addr={} sessionsClosed={closed}",
                    self.local_addr
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::borrow::Cow;

    #[test]
    fn new_table_presets_command_block() {
        let table = RegisterTable::new();
        assert_eq!(table.len(), 400);
        assert_eq!(table.read(0, 5).unwrap(), &[0, 220, 450, 10, 50]);
        assert_eq!(table.get(Signal::FanSpeed), 0);
    }

    #[test]
    fn out_of_range_access_is_rejected_without_partial_write() {
        let mut table = RegisterTable::new();
        assert!(table.read(399, 2).is_none());
        assert!(table.read(u16::MAX, 1).is_none());
        assert!(table.write(398, &[1, 2, 3]).is_none());
        assert_eq!(table.read(398, 2).unwrap(), &[0, 0]);
    }

    #[test]
    fn service_answers_read_and_write_function_codes() {
        let table = RegisterTable::shared();
        let service = RegisterService::new(Arc::clone(&table));

        assert_eq!(
            service.handle(Request::WriteSingleRegister(0, 1)),
            Ok(Response::WriteSingleRegister(0, 1))
        );
        assert_eq!(
            service.handle(Request::WriteMultipleRegisters(1, Cow::Owned(vec![235, 500]))),
            Ok(Response::WriteMultipleRegisters(1, 2))
        );
        assert_eq!(
            service.handle(Request::ReadHoldingRegisters(0, 3)),
            Ok(Response::ReadHoldingRegisters(vec![1, 235, 500]))
        );
        assert_eq!(table.lock().get(Signal::SetpointTemp), 235);
    }

    #[test]
    fn service_rejects_unknown_functions_and_addresses() {
        let service = RegisterService::new(RegisterTable::shared());
        assert_eq!(
            service.handle(Request::ReadCoils(0, 1)),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            service.handle(Request::ReadHoldingRegisters(390, 20)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            service.handle(Request::WriteSingleRegister(400, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[tokio::test]
    async fn server_stops_on_signal() {
        let server = RegisterServer::bind("127.0.0.1:0", RegisterTable::shared())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);

        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(server.run(stop_rx));
        stop_tx.send(true).unwrap();

        let res = tokio::time::timeout(std::time::Duration::from_secs(1), join)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn stop_closes_open_sessions() {
        let table = RegisterTable::shared();
        let server = RegisterServer::bind("127.0.0.1:0", Arc::clone(&table))
            .await
            .unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(server.run(stop_rx));

        let mut client = tokio_modbus::client::tcp::connect_slave(addr, Slave(1))
            .await
            .unwrap();
        assert_eq!(
            client.read_holding_registers(1, 1).await.unwrap(),
            Ok(vec![220])
        );

        stop_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), join)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let write = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            client.write_single_register(1, 999),
        )
        .await
        .unwrap();
        assert!(write.is_err(), "session still served: {write:?}");
        assert_eq!(table.lock().get(Signal::SetpointTemp), 220);
    }
}
