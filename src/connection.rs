use crate::channels::Block;
use crate::modbus::{ModbusTcpCodec, Operation, Request, Response, ResponseKind};
use crate::registers::RegisterWindow;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("connecting to `{0}` timed out")]
    ConnectTimeout(String),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the controller closed the connection")]
    ConnectionClosed,
    #[error("no response for transaction {0} within the timeout budget")]
    ResponseTimeout(u16),
    #[error("the controller responded with exception code {0}")]
    Exception(u8),
    #[error("the controller responded with an unexpected frame: {0:?}")]
    UnexpectedResponse(ResponseKind),
}

/// Connection parameters, parsed once at startup and immutable thereafter.
#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Address (host or host:port) of the controller's Modbus TCP endpoint.
    #[arg(long, short = 'a')]
    pub address: String,

    /// The modbus device ID.
    #[arg(long, short = 'i', default_value = "1")]
    pub device_id: u8,

    /// Give up on establishing the TCP connection after this long.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: humantime::Duration,

    /// Consider a request failed if its response does not arrive in this
    /// amount of time. Failed poll reads are retried on the next scheduled
    /// cycle, never within the same one.
    #[arg(long, default_value = "2s")]
    pub read_timeout: humantime::Duration,
}

impl Args {
    fn address_with_port(&self) -> String {
        if self.address.contains(':') {
            self.address.clone()
        } else {
            format!("{}:502", self.address)
        }
    }
}

/// One transport session. A session brackets exactly one poll cycle or one
/// command: open, a few reads/writes, close. It is never shared or reused
/// across cycles, so a failure mid-transaction cannot leak into the next
/// cycle. Retrying is the caller's business.
pub struct Session {
    io: Framed<TcpStream, ModbusTcpCodec>,
    device_id: u8,
    read_timeout: std::time::Duration,
    next_transaction_id: u16,
}

impl Session {
    pub async fn open(args: &Args) -> Result<Session, Error> {
        let address = args.address_with_port();
        let addresses = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let connect = TcpStream::connect(&*addresses);
        let socket = tokio::time::timeout(*args.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout(address.clone()))?
            .map_err(|e| Error::Connect(e, address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "session open", address);
        Ok(Session {
            io: Framed::new(socket, ModbusTcpCodec {}),
            device_id: args.device_id,
            read_timeout: *args.read_timeout,
            next_transaction_id: 0,
        })
    }

    pub async fn read_block(&mut self, block: Block) -> Result<RegisterWindow, Error> {
        let address = block.address();
        let operation = Operation::ReadBlock { address, count: block.words() };
        let response = self.roundtrip(operation).await?;
        match response.kind {
            ResponseKind::ReadBlock { bytes } => Ok(RegisterWindow::new(address, bytes)),
            ResponseKind::Exception(code) => Err(Error::Exception(code)),
            other => Err(Error::UnexpectedResponse(other)),
        }
    }

    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        let operation = Operation::WriteRegister { address, value };
        let response = self.roundtrip(operation).await?;
        match response.kind {
            ResponseKind::WriteRegister { .. } => Ok(()),
            ResponseKind::Exception(code) => Err(Error::Exception(code)),
            other => Err(Error::UnexpectedResponse(other)),
        }
    }

    /// Send one request and wait for its response. Responses with stale
    /// transaction IDs (left over from a request that already timed out)
    /// are discarded.
    async fn roundtrip(&mut self, operation: Operation) -> Result<Response, Error> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        let request = Request { device_id: self.device_id, transaction_id, operation };
        self.io.send(&request).await.map_err(Error::Send)?;
        let receive = async {
            loop {
                match self.io.next().await {
                    None => break Err(Error::ConnectionClosed),
                    Some(Err(e)) => break Err(Error::Receive(e)),
                    Some(Ok(response)) if response.transaction_id == transaction_id => {
                        break Ok(response);
                    }
                    Some(Ok(response)) => {
                        debug!(
                            message = "discarding response to a stale transaction",
                            transaction = response.transaction_id
                        );
                    }
                }
            }
        };
        tokio::time::timeout(self.read_timeout, receive)
            .await
            .map_err(|_| Error::ResponseTimeout(transaction_id))?
    }

    /// Tear the session down. Close failures are logged rather than
    /// propagated; the cycle outcome was decided before this point.
    pub async fn close(mut self) {
        if let Err(e) = self.io.close().await {
            debug!(message = "session close failed", error = &e as &dyn std::error::Error);
        } else {
            trace!("session closed");
        }
    }
}
