use std::net::SocketAddr;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use rust_box::handy_grpc::{
    client::Client,
    server::{server, Message as GrpcMessage},
    Priority,
};
use rust_box::mpsc::priority_channel as channel;

use super::message::{Message, MessageReply};
use super::transport::PeerClient;
use super::ClusterView;
use crate::Result;

const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 4;

/// Serves the requests of peer nodes.
pub struct GrpcServer {
    view: ClusterView,
}

impl GrpcServer {
    pub fn new(view: ClusterView) -> Self {
        Self { view }
    }

    pub async fn listen_and_serve(self, server_laddr: SocketAddr, reuseaddr: bool, reuseport: bool) -> Result<()> {
        let runner = async move {
            let (tx, mut rx) = channel::<Priority, GrpcMessage>(100_000);
            let recv_data_fut = async move {
                while let Some((_, (data, reply_tx))) = rx.next().await {
                    let reply = self.on_recv_message(data).await;
                    if let Some(reply_tx) = reply_tx {
                        if let Err(e) = reply_tx.send(reply.map(|r| r.unwrap_or_default())) {
                            log::error!("gRPC send result failure, {:?}", e);
                        }
                    }
                }
                log::error!("Recv None");
            };

            let run_receiver_fut = async move {
                loop {
                    if let Err(e) = server(server_laddr, tx.clone())
                        .max_decoding_message_size(MAX_MESSAGE_SIZE)
                        .max_encoding_message_size(MAX_MESSAGE_SIZE)
                        .reuseaddr(reuseaddr)
                        .reuseport(reuseport)
                        .run()
                        .await
                    {
                        log::error!("Run gRPC receiver error, {:?}", e);
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            };
            futures::future::join(recv_data_fut, run_receiver_fut).await;
        };

        tokio::spawn(runner);
        log::info!("cluster gRPC listening on {}", server_laddr);
        Ok(())
    }

    async fn on_recv_message(&self, req: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let msg = Message::decode(&req)?;
        log::trace!("recv {} from peer", msg.typ());
        let reply = self.view.handle(msg).await;
        Ok(Some(reply.encode()?))
    }
}

/// gRPC connection to a peer node.
///
/// The channel is connected lazily and reconnects on demand, a peer that is
/// down only fails the calls made while it is unreachable.
#[derive(Clone)]
pub struct GrpcClient {
    inner: Client,
}

impl GrpcClient {
    //server_addr - ip:port, 127.0.0.1:5363
    pub fn new(server_addr: &str, client_timeout: Duration, client_concurrency_limit: usize) -> Result<Self> {
        let c = Client::new(server_addr.into())
            .connect_timeout(client_timeout)
            .concurrency_limit(client_concurrency_limit)
            .chunk_size(1024 * 1024 * 2)
            .connect_lazy()
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(Self { inner: c })
    }
}

#[async_trait]
impl PeerClient for GrpcClient {
    async fn send(&self, msg: Message) -> Result<MessageReply> {
        let req = msg.encode()?;
        let reply = self.inner.clone().send(req).await?;
        MessageReply::decode(&reply)
    }
}
