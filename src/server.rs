//! Modbus TCP side of the bridge.
//!
//! Every accepted connection gets its own [`SunSpecService`], all of them
//! reading the same [`RegisterStore`]. Requests are answered from the store
//! with the request address passed through untouched, so the inverter finds
//! the SunSpec block at the store's base offset.

use crate::{protocol::MAX_READ_QUANTITY, register_store::RegisterStore};
use log::*;
use std::{future, io, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

/// Read-only register service over a shared store.
#[derive(Debug, Clone)]
pub struct SunSpecService {
    store: Arc<RegisterStore>,
}

impl SunSpecService {
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self { store }
    }

    fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        if count == 0 || count > MAX_READ_QUANTITY {
            warn!("Rejecting read of {count} registers at {address}");
            return Err(ExceptionCode::IllegalDataValue);
        }
        let values = self.store.read(address, count);
        trace!("Read {address}+{count}: {values:04X?}");
        Ok(values)
    }
}

impl tokio_modbus::server::Service for SunSpecService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Modbus request: {req:?}");
        let res = match req {
            Request::ReadHoldingRegisters(address, count) => {
                self.read(address, count).map(Response::ReadHoldingRegisters)
            }
            // some clients probe the input table first
            Request::ReadInputRegisters(address, count) => {
                self.read(address, count).map(Response::ReadInputRegisters)
            }
            _ => {
                warn!("Unsupported function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

/// Binds `listen_addr` and serves `store` until the listener fails.
pub async fn serve(listen_addr: SocketAddr, store: Arc<RegisterStore>) -> io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    serve_listener(listener, store).await
}

/// Serves `store` on an already bound listener.
pub async fn serve_listener(listener: TcpListener, store: Arc<RegisterStore>) -> io::Result<()> {
    info!("Modbus TCP server listening on {}", listener.local_addr()?);
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr: SocketAddr| {
        let store = store.clone();
        async move {
            debug!("Modbus client connected: {socket_addr}");
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(SunSpecService::new(store.clone())))
            })
        }
    };
    let on_process_error = |err| {
        error!("Modbus connection error: {err}");
    };

    server.serve(&on_connected, on_process_error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SUNSPEC_MARKER;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tokio::time;
    use tokio_modbus::server::Service;

    const BASE: u16 = 40000;

    fn store() -> Arc<RegisterStore> {
        let store = Arc::new(RegisterStore::new(BASE, 200));
        store.write(BASE, &SUNSPEC_MARKER);
        store.write(BASE + 71, &[0x4974, 0x2400]);
        store
    }

    async fn start_server(
        store: Arc<RegisterStore>,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let socket_addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(err) = serve_listener(listener, store).await {
                eprintln!("Server error: {err}");
            }
        });
        time::sleep(Duration::from_millis(50)).await;
        Ok((socket_addr, handle))
    }

    #[tokio::test]
    async fn read_holding_and_input_registers() -> Result<(), Box<dyn std::error::Error>> {
        let (socket_addr, handle) = start_server(store()).await?;
        let mut ctx = tcp::connect(socket_addr).await?;

        let marker = ctx.read_holding_registers(BASE, 2).await??;
        assert_eq!(marker, SUNSPEC_MARKER);

        let energy = ctx.read_input_registers(BASE + 71, 2).await??;
        assert_eq!(energy, vec![0x4974, 0x2400]);

        // outside the image
        let zeros = ctx.read_holding_registers(0, 3).await??;
        assert_eq!(zeros, vec![0, 0, 0]);

        ctx.disconnect().await?;
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_clients_share_the_store() -> Result<(), Box<dyn std::error::Error>> {
        let store = store();
        let (socket_addr, handle) = start_server(store.clone()).await?;
        let mut first = tcp::connect(socket_addr).await?;
        let mut second = tcp::connect(socket_addr).await?;

        store.write(BASE + 100, &[42]);
        assert_eq!(first.read_holding_registers(BASE + 100, 1).await??, vec![42]);
        assert_eq!(second.read_holding_registers(BASE + 100, 1).await??, vec![42]);

        first.disconnect().await?;
        second.disconnect().await?;
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn writes_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let store = store();
        let (socket_addr, handle) = start_server(store.clone()).await?;
        let mut ctx = tcp::connect(socket_addr).await?;

        assert_matches!(
            ctx.write_single_register(BASE, 1).await?,
            Err(ExceptionCode::IllegalFunction)
        );
        assert_matches!(
            ctx.read_coils(0, 8).await?,
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(store.read(BASE, 2), SUNSPEC_MARKER);

        ctx.disconnect().await?;
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn quantity_limits() {
        let service = SunSpecService::new(store());
        assert_matches!(
            service.call(Request::ReadHoldingRegisters(BASE, 0)).await,
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_matches!(
            service.call(Request::ReadInputRegisters(BASE, 126)).await,
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_matches!(
            service.call(Request::ReadHoldingRegisters(BASE, 125)).await,
            Ok(Response::ReadHoldingRegisters(values)) if values.len() == 125
        );
    }
}
