// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! TCP transport on tokio.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Input, Transport, TransportError, TransportEvent};

const READ_BUFFER_SIZE: usize = 4096;

enum WriterCommand {
    Data(Bytes),
    Close,
}

/// Plain TCP connection.
///
/// Reading and writing happen on spawned tasks; results are posted to the
/// event loop as [`Input::Transport`].
pub struct TcpTransport {
    writer: mpsc::UnboundedSender<WriterCommand>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl TcpTransport {
    /// Connect to `addr`, posting activity into `events`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        events: mpsc::UnboundedSender<Input>,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, events))
    }

    /// Wrap an established connection.
    pub fn from_stream(stream: TcpStream, events: mpsc::UnboundedSender<Input>) -> Self {
        let (mut rd, mut wr) = stream.into_split();

        let read_events = events.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let event = match rd.read(&mut buf).await {
                    Ok(0) => TransportEvent::Closed,
                    Ok(n) => {
                        log::trace!("Read {} bytes", n);
                        TransportEvent::DataRead(Bytes::copy_from_slice(&buf[..n]))
                    }
                    Err(e) => TransportEvent::Error(TransportError::Read(e)),
                };
                let done = !matches!(event, TransportEvent::DataRead(_));
                if read_events.send(Input::Transport(event)).is_err() || done {
                    break;
                }
            }
        });

        let (writer, mut commands) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    WriterCommand::Data(data) => {
                        if let Err(e) = wr.write_all(&data).await {
                            let _: Result<_, _> = events.send(Input::Transport(
                                TransportEvent::Error(TransportError::Write(e)),
                            ));
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let _: Result<_, _> = wr.shutdown().await;
                        break;
                    }
                }
            }
        });

        Self {
            writer,
            reader,
            closed: false,
        }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: &[u8]) {
        if self.closed {
            log::debug!("Dropping {} bytes written after close", data.len());
            return;
        }
        let _: Result<_, _> = self
            .writer
            .send(WriterCommand::Data(Bytes::copy_from_slice(data)));
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _: Result<_, _> = self.writer.send(WriterCommand::Close);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
